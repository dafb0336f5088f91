use super::{DeviceGateway, GatewayError, ResultCode, parser, split_reader_list};
use crate::models::card::{CardData, ReaderStatus};

/// Reader names reported by the simulator, in toolkit list format.
const SIMULATED_READERS: &str = "EID Simulated Reader 0";

/// An in-process stand-in for the card-reader toolkit.
///
/// Reports one reader with a sample card always inserted. Documents it
/// produces echo the request id but carry no signature.
#[derive(Debug, Default)]
pub struct SimulatedGateway {
    initialized: bool,
    selected: Option<String>,
    connected: bool,
}

impl SimulatedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn sample_document(request_id: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<PublicData xmlns:vg="http://www.emiratesid.ae/vg">
  <vg:Message>
    <RequestID>{}</RequestID>
    <IdNumber>784-1988-1234567-1</IdNumber>
    <FullNameEnglish>AJAY RAMACHANDRAN</FullNameEnglish>
    <Nationality>INDIA</Nationality>
    <DateOfBirth>1977-01-01</DateOfBirth>
    <Gender>M</Gender>
    <ExpiryDate>2032-12-31</ExpiryDate>
  </vg:Message>
</PublicData>"#,
            escape_text(request_id)
        )
    }
}

fn escape_text(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

impl DeviceGateway for SimulatedGateway {
    fn initialize(&mut self, process_mode: bool, config_path: &str) -> Result<ResultCode, GatewayError> {
        tracing::debug!(process_mode, config_path, "simulated toolkit initialized");
        self.initialized = true;
        Ok(0)
    }

    fn list_readers(&mut self) -> Result<Vec<String>, GatewayError> {
        if !self.initialized {
            return Err(GatewayError::Status(1));
        }
        Ok(split_reader_list(SIMULATED_READERS))
    }

    fn select_reader(&mut self, name: &str) -> Result<ResultCode, GatewayError> {
        if !split_reader_list(SIMULATED_READERS).iter().any(|r| r == name) {
            return Ok(4);
        }
        self.selected = Some(name.to_string());
        Ok(0)
    }

    fn connect_card(&mut self) -> Result<ResultCode, GatewayError> {
        if self.selected.is_none() {
            return Ok(2);
        }
        self.connected = true;
        Ok(0)
    }

    fn reader_status(&mut self) -> Result<ReaderStatus, GatewayError> {
        let status = match (self.initialized, self.selected.is_some(), self.connected) {
            (false, _, _) => ReaderStatus::ToolkitNotInitialized,
            (true, false, _) => ReaderStatus::ReaderNotSelected,
            (true, true, false) => ReaderStatus::CardNotConnected,
            (true, true, true) => ReaderStatus::Ready,
        };
        Ok(status)
    }

    fn read_card(&mut self, request_id: &str) -> Result<CardData, GatewayError> {
        if !self.connected {
            return Err(GatewayError::Status(3));
        }
        parser::parse_public_data(&Self::sample_document(request_id))
    }

    fn photo(&mut self) -> Result<Option<Vec<u8>>, GatewayError> {
        Ok(None)
    }

    fn disconnect_card(&mut self) -> Result<ResultCode, GatewayError> {
        self.connected = false;
        Ok(0)
    }

    fn cleanup(&mut self) -> Result<ResultCode, GatewayError> {
        self.initialized = false;
        self.selected = None;
        self.connected = false;
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_session_reads_sample_card() {
        let mut gateway = SimulatedGateway::new();
        assert_eq!(gateway.initialize(true, "config_ap").unwrap(), 0);

        let readers = gateway.list_readers().unwrap();
        assert_eq!(readers, vec!["EID Simulated Reader 0"]);
        assert_eq!(gateway.select_reader(&readers[0]).unwrap(), 0);
        assert_eq!(gateway.connect_card().unwrap(), 0);
        assert_eq!(gateway.reader_status().unwrap(), ReaderStatus::Ready);

        let card = gateway.read_card("req<1>").unwrap();
        assert_eq!(card.correlation_id.as_deref(), Some("req<1>"));
        assert_eq!(card.id_number_raw, "784-1988-1234567-1");

        assert_eq!(gateway.disconnect_card().unwrap(), 0);
        assert_eq!(gateway.cleanup().unwrap(), 0);
        assert_eq!(gateway.reader_status().unwrap(), ReaderStatus::ToolkitNotInitialized);
    }

    #[test]
    fn unknown_reader_is_not_found() {
        let mut gateway = SimulatedGateway::new();
        gateway.initialize(true, "config_ap").unwrap();
        assert_eq!(gateway.select_reader("nope").unwrap(), 4);
    }
}
