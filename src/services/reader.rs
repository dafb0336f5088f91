//! The card-read session: one serialized pass over the reader from
//! toolkit initialization to cleanup.

use std::sync::Arc;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::{BusyPolicy, Config};
use crate::crypto::integrity::IntegrityValidator;
use crate::crypto::request_id::generate_request_id;
use crate::device::{DeviceGateway, GatewayError, ResultCode};
use crate::error::{AppError, ErrorKind};
use crate::models::card::{CardData, ReadResult};
use crate::models::session::CardSession;
use crate::services::error_map::{result_code_error, status_error};

/// Message returned to callers for every integrity failure.
const INTEGRITY_FAILED: &str = "integrity validation failed";

/// Why a read did not produce a result.
#[derive(Error, Debug)]
pub enum ReadError {
    /// A toolkit call failed or the reader reported a non-ready state.
    #[error("{step} failed: {detail}")]
    Device {
        kind: ErrorKind,
        step: &'static str,
        code: Option<ResultCode>,
        detail: String,
    },

    /// The caller went away or the deadline passed between toolkit calls.
    #[error("read cancelled before {0}")]
    Cancelled(&'static str),

    /// The overall read deadline elapsed.
    #[error("read deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    /// The payload failed the correlation or signature check.
    #[error("integrity validation failed: {0}")]
    Integrity(String),

    /// Another read holds the reader and the busy policy is `reject`.
    #[error("reader busy")]
    Busy,

    /// The session task itself failed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ReadError {
    /// The taxonomy entry reported to the caller.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReadError::Device { kind, .. } => *kind,
            ReadError::Cancelled(_) | ReadError::DeadlineExceeded(_) => ErrorKind::Timeout,
            ReadError::Integrity(_) | ReadError::Busy | ReadError::Internal(_) => {
                ErrorKind::InternalError
            }
        }
    }

    fn device(kind: ErrorKind, step: &'static str, code: Option<ResultCode>, detail: impl Into<String>) -> Self {
        ReadError::Device {
            kind,
            step,
            code,
            detail: detail.into(),
        }
    }
}

impl From<ReadError> for AppError {
    fn from(err: ReadError) -> Self {
        let kind = err.kind();
        let message = match &err {
            ReadError::Integrity(_) => Some(INTEGRITY_FAILED.to_string()),
            ReadError::Busy => Some("Reader is busy.".to_string()),
            _ => None,
        };
        AppError::Read {
            kind,
            message,
            detail: err.to_string(),
        }
    }
}

/// Session parameters taken from configuration.
#[derive(Clone, Debug)]
pub struct ReaderSettings {
    pub process_mode: bool,
    pub config_path: String,
    pub preferred_reader: String,
    pub read_timeout: Duration,
    pub busy_policy: BusyPolicy,
}

impl From<&Config> for ReaderSettings {
    fn from(config: &Config) -> Self {
        Self {
            process_mode: config.ica_process_mode,
            config_path: config.ica_config_path.clone(),
            preferred_reader: config.ica_preferred_reader_name.clone(),
            read_timeout: config.read_timeout(),
            busy_policy: config.busy_policy,
        }
    }
}

/// Owns the reader and runs card reads one at a time.
#[derive(Clone)]
pub struct CardReaderService {
    gateway: Arc<Mutex<Box<dyn DeviceGateway>>>,
    validator: Option<IntegrityValidator>,
    settings: ReaderSettings,
}

impl CardReaderService {
    /// Creates the service. `validator` is `None` when integrity validation
    /// is disabled.
    pub fn new(
        gateway: Box<dyn DeviceGateway>,
        validator: Option<IntegrityValidator>,
        settings: ReaderSettings,
    ) -> Self {
        Self {
            gateway: Arc::new(Mutex::new(gateway)),
            validator,
            settings,
        }
    }

    /// Reads the inserted card.
    ///
    /// Waits for the reader according to the busy policy, then runs the whole
    /// session on a blocking thread while holding the reader. `cancel` is
    /// checked before every toolkit call and is cancelled here when the
    /// deadline passes. The reader is released only after cleanup, even when
    /// this future is dropped early.
    pub async fn read(&self, cancel: CancellationToken) -> Result<ReadResult, ReadError> {
        let deadline = self.settings.read_timeout;

        match tokio::time::timeout(deadline, self.read_serialized(cancel.clone())).await {
            Ok(result) => result,
            Err(_) => {
                cancel.cancel();
                tracing::warn!("⏱️ Card read exceeded its {:?} deadline", deadline);
                Err(ReadError::DeadlineExceeded(deadline))
            }
        }
    }

    async fn read_serialized(&self, cancel: CancellationToken) -> Result<ReadResult, ReadError> {
        let mut reader = match self.settings.busy_policy {
            BusyPolicy::Wait => tokio::select! {
                reader = self.gateway.clone().lock_owned() => reader,
                _ = cancel.cancelled() => return Err(ReadError::Cancelled("acquiring the reader")),
            },
            BusyPolicy::Reject => self
                .gateway
                .clone()
                .try_lock_owned()
                .map_err(|_| ReadError::Busy)?,
        };

        let settings = self.settings.clone();
        let validator = self.validator.clone();
        let request_id = generate_request_id();

        tokio::task::spawn_blocking(move || {
            run_session(&mut **reader, &settings, validator.as_ref(), &request_id, &cancel)
        })
        .await
        .map_err(|e| ReadError::Internal(format!("card session task failed: {}", e)))?
    }
}

/// Chooses the reader for this session.
///
/// A configured name matching a listed reader case-insensitively wins;
/// otherwise the first listed reader is used. `None` only for an empty list.
pub fn resolve_reader<'a>(readers: &'a [String], preferred: &str) -> Option<&'a str> {
    let first = readers.first()?;
    let preferred = preferred.trim().to_lowercase();

    if !preferred.is_empty() {
        if let Some(found) = readers.iter().find(|r| r.to_lowercase() == preferred) {
            return Some(found);
        }
        tracing::debug!("Preferred reader not attached; using the first reader");
    }
    Some(first)
}

/// Releases whatever the session acquired when it goes out of scope.
struct SessionGuard<'a> {
    gateway: &'a mut dyn DeviceGateway,
    session: CardSession,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if self.session.card_connected {
            self.session.card_connected = false;
            log_teardown("disconnect_card", self.gateway.disconnect_card());
        }
        if self.session.device_initialized {
            self.session.device_initialized = false;
            log_teardown("cleanup", self.gateway.cleanup());
        }
    }
}

fn log_teardown(step: &str, outcome: Result<ResultCode, GatewayError>) {
    match outcome {
        Ok(0) => tracing::debug!("{} completed", step),
        Ok(code) => tracing::warn!("⚠️ {} returned code {} (ignored)", step, code),
        Err(e) => tracing::warn!("⚠️ {} failed: {} (ignored)", step, e),
    }
}

fn checkpoint(cancel: &CancellationToken, step: &'static str) -> Result<(), ReadError> {
    if cancel.is_cancelled() {
        tracing::warn!("🛑 Card read cancelled before {}", step);
        return Err(ReadError::Cancelled(step));
    }
    Ok(())
}

fn expect_success(step: &'static str, code: ResultCode) -> Result<(), ReadError> {
    match result_code_error(code) {
        None => Ok(()),
        Some(kind) => Err(ReadError::device(
            kind,
            step,
            Some(code),
            format!("toolkit returned code {}", code),
        )),
    }
}

fn gateway_failure(step: &'static str) -> impl FnOnce(GatewayError) -> ReadError {
    move |err| match err {
        GatewayError::Status(code) => ReadError::device(
            result_code_error(code).unwrap_or(ErrorKind::InternalError),
            step,
            Some(code),
            err.to_string(),
        ),
        GatewayError::Transport(_) | GatewayError::MalformedPayload(_) => {
            ReadError::device(ErrorKind::InternalError, step, None, err.to_string())
        }
    }
}

fn run_session(
    gateway: &mut dyn DeviceGateway,
    settings: &ReaderSettings,
    validator: Option<&IntegrityValidator>,
    request_id: &str,
    cancel: &CancellationToken,
) -> Result<ReadResult, ReadError> {
    let session = CardSession::new();
    let span = tracing::info_span!("card_session", session_id = %session.session_id);
    let _entered = span.enter();

    let mut guard = SessionGuard { gateway, session };

    checkpoint(cancel, "initialize")?;
    let code = guard
        .gateway
        .initialize(settings.process_mode, &settings.config_path)
        .map_err(gateway_failure("initialize"))?;
    expect_success("initialize", code)?;
    guard.session.device_initialized = true;

    checkpoint(cancel, "list_readers")?;
    let readers = guard
        .gateway
        .list_readers()
        .map_err(gateway_failure("list_readers"))?;
    let reader = resolve_reader(&readers, &settings.preferred_reader).ok_or_else(|| {
        ReadError::device(ErrorKind::ReaderNotFound, "list_readers", None, "no readers attached")
    })?;
    guard.session.selected_reader = reader.to_string();
    tracing::info!("🔌 Using reader {:?}", reader);

    checkpoint(cancel, "select_reader")?;
    let code = guard
        .gateway
        .select_reader(reader)
        .map_err(gateway_failure("select_reader"))?;
    expect_success("select_reader", code)?;

    checkpoint(cancel, "connect_card")?;
    let code = guard
        .gateway
        .connect_card()
        .map_err(gateway_failure("connect_card"))?;
    expect_success("connect_card", code)?;
    guard.session.card_connected = true;

    checkpoint(cancel, "reader_status")?;
    let status = guard
        .gateway
        .reader_status()
        .map_err(gateway_failure("reader_status"))?;
    if let Some(kind) = status_error(status) {
        return Err(ReadError::device(
            kind,
            "reader_status",
            None,
            format!("reader reported {:?}", status),
        ));
    }

    checkpoint(cancel, "read_card")?;
    let card = guard
        .gateway
        .read_card(request_id)
        .map_err(gateway_failure("read_card"))?;

    let card = match validator {
        Some(validator) => verify_card(validator, &card, request_id)?,
        None => {
            tracing::debug!("Integrity validation disabled; card data accepted as read");
            card
        }
    };

    checkpoint(cancel, "photo")?;
    let photo = match guard.gateway.photo() {
        Ok(photo) => photo,
        Err(e) => {
            tracing::warn!("⚠️ Photo unavailable: {}", e);
            None
        }
    };
    let photo_base64 = photo
        .filter(|bytes| !bytes.is_empty())
        .map(|bytes| general_purpose::STANDARD.encode(bytes));

    tracing::info!("✅ Card read completed");
    Ok(ReadResult::from_card(card, photo_base64))
}

/// Returns the card data the signature authenticates, in place of what the
/// toolkit parsed from the whole document.
fn verify_card(validator: &IntegrityValidator, card: &CardData, request_id: &str) -> Result<CardData, ReadError> {
    let (Some(payload), Some(echoed)) = (
        card.raw_signed_payload.as_deref(),
        card.correlation_id.as_deref(),
    ) else {
        return Err(ReadError::Integrity(
            "payload or correlation id missing".to_string(),
        ));
    };

    if echoed != request_id {
        return Err(ReadError::Integrity(
            "toolkit reported a different request id".to_string(),
        ));
    }
    validator.check(request_id, payload).map_err(|e| {
        tracing::warn!("🛡️ Integrity validation failed: {}", e);
        ReadError::Integrity(e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::testing::{self, SignOptions};
    use crate::crypto::xmldsig::XmlDsigVerifier;
    use crate::device::parser::parse_public_data;
    use crate::models::card::ReaderStatus;
    use std::sync::Mutex as StdMutex;

    type CallLog = Arc<StdMutex<Vec<&'static str>>>;

    /// A gateway that plays back configured outcomes and records each call.
    struct ScriptedGateway {
        calls: CallLog,
        init: Result<ResultCode, &'static str>,
        readers: Vec<String>,
        select_code: ResultCode,
        connect_code: ResultCode,
        status: ReaderStatus,
        signed: bool,
        echo_request_id: bool,
        unsigned_prefix: Option<&'static str>,
        unsigned_fresh_request_id: bool,
        photo: Result<Option<Vec<u8>>, ()>,
        disconnect_code: ResultCode,
        cleanup_fails: bool,
        cancel_on_connect: Option<CancellationToken>,
        read_delay: Duration,
        selected: Arc<StdMutex<Option<String>>>,
    }

    impl ScriptedGateway {
        fn new(calls: CallLog) -> Self {
            Self {
                calls,
                init: Ok(0),
                readers: vec!["Reader A".to_string()],
                select_code: 0,
                connect_code: 0,
                status: ReaderStatus::Ready,
                signed: false,
                echo_request_id: true,
                unsigned_prefix: None,
                unsigned_fresh_request_id: false,
                photo: Ok(Some(vec![0xFF, 0xD8, 0xFF])),
                disconnect_code: 0,
                cleanup_fails: false,
                cancel_on_connect: None,
                read_delay: Duration::ZERO,
                selected: Arc::default(),
            }
        }

        fn record(&self, call: &'static str) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl DeviceGateway for ScriptedGateway {
        fn initialize(&mut self, _process_mode: bool, _config_path: &str) -> Result<ResultCode, GatewayError> {
            self.record("initialize");
            self.init.map_err(|e| GatewayError::Transport(e.to_string()))
        }

        fn list_readers(&mut self) -> Result<Vec<String>, GatewayError> {
            self.record("list_readers");
            Ok(self.readers.clone())
        }

        fn select_reader(&mut self, name: &str) -> Result<ResultCode, GatewayError> {
            self.record("select_reader");
            *self.selected.lock().unwrap() = Some(name.to_string());
            Ok(self.select_code)
        }

        fn connect_card(&mut self) -> Result<ResultCode, GatewayError> {
            self.record("connect_card");
            if let Some(token) = &self.cancel_on_connect {
                token.cancel();
            }
            Ok(self.connect_code)
        }

        fn reader_status(&mut self) -> Result<ReaderStatus, GatewayError> {
            self.record("reader_status");
            Ok(self.status)
        }

        fn read_card(&mut self, request_id: &str) -> Result<CardData, GatewayError> {
            self.record("read_card");
            std::thread::sleep(self.read_delay);
            let echoed = if self.echo_request_id { request_id } else { "stale-request" };
            let mut xml = if self.signed {
                testing::signed_response(echoed, SignOptions::default())
            } else {
                testing::unsigned_response(echoed)
            };
            if let Some(fragment) = self.unsigned_prefix {
                xml = testing::prepend_unsigned(&xml, fragment);
            }
            if self.unsigned_fresh_request_id {
                xml = testing::prepend_unsigned(&xml, &format!("<RequestID>{request_id}</RequestID>"));
            }
            parse_public_data(&xml)
        }

        fn photo(&mut self) -> Result<Option<Vec<u8>>, GatewayError> {
            self.record("photo");
            self.photo
                .clone()
                .map_err(|_| GatewayError::Transport("photo buffer".to_string()))
        }

        fn disconnect_card(&mut self) -> Result<ResultCode, GatewayError> {
            self.record("disconnect_card");
            Ok(self.disconnect_code)
        }

        fn cleanup(&mut self) -> Result<ResultCode, GatewayError> {
            self.record("cleanup");
            if self.cleanup_fails {
                return Err(GatewayError::Transport("toolkit gone".to_string()));
            }
            Ok(0)
        }
    }

    fn settings() -> ReaderSettings {
        ReaderSettings {
            process_mode: true,
            config_path: "config_ap".to_string(),
            preferred_reader: String::new(),
            read_timeout: Duration::from_secs(5),
            busy_policy: BusyPolicy::Wait,
        }
    }

    fn service(gateway: ScriptedGateway, validate: bool, settings: ReaderSettings) -> CardReaderService {
        let validator = validate.then(|| IntegrityValidator::new(Arc::new(XmlDsigVerifier::new())));
        CardReaderService::new(Box::new(gateway), validator, settings)
    }

    fn calls(log: &CallLog) -> Vec<&'static str> {
        log.lock().unwrap().clone()
    }

    fn count(log: &CallLog, call: &str) -> usize {
        calls(log).iter().filter(|c| **c == call).count()
    }

    #[tokio::test]
    async fn successful_read_runs_every_step_in_order() {
        let log = CallLog::default();
        let svc = service(ScriptedGateway::new(log.clone()), false, settings());

        let result = svc.read(CancellationToken::new()).await.unwrap();

        assert_eq!(result.eid_number_masked, "***********5671");
        assert_eq!(result.full_name_en, "AJAY RAMACHANDRAN");
        assert_eq!(result.photo_base64.as_deref(), Some("/9j/"));
        assert_eq!(
            calls(&log),
            vec![
                "initialize",
                "list_readers",
                "select_reader",
                "connect_card",
                "reader_status",
                "read_card",
                "photo",
                "disconnect_card",
                "cleanup",
            ]
        );
    }

    #[tokio::test]
    async fn connect_failure_cleans_up_once_without_disconnect() {
        let log = CallLog::default();
        let mut gateway = ScriptedGateway::new(log.clone());
        gateway.connect_code = 5;
        let svc = service(gateway, false, settings());

        let err = svc.read(CancellationToken::new()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::CardNotPresent);
        assert_eq!(count(&log, "cleanup"), 1);
        assert_eq!(count(&log, "disconnect_card"), 0);
    }

    #[tokio::test]
    async fn empty_reader_list_is_reader_not_found_and_still_cleans_up() {
        let log = CallLog::default();
        let mut gateway = ScriptedGateway::new(log.clone());
        gateway.readers.clear();
        let svc = service(gateway, false, settings());

        let err = svc.read(CancellationToken::new()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ReaderNotFound);
        assert_eq!(calls(&log), vec!["initialize", "list_readers", "cleanup"]);
    }

    #[test]
    fn preferred_reader_matches_case_insensitively() {
        let readers = vec!["A".to_string(), "B".to_string()];
        assert_eq!(resolve_reader(&readers, "b"), Some("B"));
        assert_eq!(resolve_reader(&readers, "Z"), Some("A"));
        assert_eq!(resolve_reader(&readers, ""), Some("A"));
        assert_eq!(resolve_reader(&[], "A"), None);
    }

    #[tokio::test]
    async fn preferred_reader_is_selected() {
        let log = CallLog::default();
        let mut gateway = ScriptedGateway::new(log.clone());
        gateway.readers = vec!["A".to_string(), "B".to_string()];
        let selected = gateway.selected.clone();
        let svc = service(
            gateway,
            false,
            ReaderSettings {
                preferred_reader: "b".to_string(),
                ..settings()
            },
        );

        svc.read(CancellationToken::new()).await.unwrap();

        assert_eq!(selected.lock().unwrap().as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn non_ready_status_maps_and_releases_everything() {
        let log = CallLog::default();
        let mut gateway = ScriptedGateway::new(log.clone());
        gateway.status = ReaderStatus::CardNotConnected;
        let svc = service(gateway, false, settings());

        let err = svc.read(CancellationToken::new()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::CardNotPresent);
        assert_eq!(count(&log, "read_card"), 0);
        assert_eq!(count(&log, "disconnect_card"), 1);
        assert_eq!(count(&log, "cleanup"), 1);
    }

    #[tokio::test]
    async fn transport_failure_on_initialize_skips_cleanup() {
        let log = CallLog::default();
        let mut gateway = ScriptedGateway::new(log.clone());
        gateway.init = Err("ica_sdk not found");
        let svc = service(gateway, false, settings());

        let err = svc.read(CancellationToken::new()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InternalError);
        assert_eq!(calls(&log), vec!["initialize"]);
    }

    #[tokio::test]
    async fn undocumented_select_code_is_internal_error() {
        let log = CallLog::default();
        let mut gateway = ScriptedGateway::new(log.clone());
        gateway.select_code = 0x51;
        let svc = service(gateway, false, settings());

        let err = svc.read(CancellationToken::new()).await.unwrap_err();

        assert!(matches!(
            err,
            ReadError::Device {
                kind: ErrorKind::InternalError,
                code: Some(0x51),
                ..
            }
        ));
        assert_eq!(count(&log, "cleanup"), 1);
    }

    #[tokio::test]
    async fn signed_payload_passes_integrity_validation() {
        let log = CallLog::default();
        let mut gateway = ScriptedGateway::new(log.clone());
        gateway.signed = true;
        let svc = service(gateway, true, settings());

        let result = svc.read(CancellationToken::new()).await.unwrap();
        assert_eq!(result.nationality, "INDIA");
    }

    #[tokio::test]
    async fn unsigned_fields_around_the_signed_message_never_reach_the_caller() {
        let log = CallLog::default();
        let mut gateway = ScriptedGateway::new(log.clone());
        gateway.signed = true;
        gateway.unsigned_prefix =
            Some("<IdNumber>999-9999-9999999-9</IdNumber><FullNameEnglish>MALLORY</FullNameEnglish>");
        let svc = service(gateway, true, settings());

        let result = svc.read(CancellationToken::new()).await.unwrap();
        assert_eq!(result.eid_number_masked, "***********5671");
        assert_eq!(result.full_name_en, "AJAY RAMACHANDRAN");
    }

    #[tokio::test]
    async fn replayed_payload_with_unsigned_fresh_request_id_fails_integrity() {
        let log = CallLog::default();
        let mut gateway = ScriptedGateway::new(log.clone());
        gateway.signed = true;
        gateway.echo_request_id = false;
        gateway.unsigned_fresh_request_id = true;
        let svc = service(gateway, true, settings());

        let err = svc.read(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ReadError::Integrity(_)));
        assert_eq!(count(&log, "photo"), 0);
    }

    #[tokio::test]
    async fn unsigned_payload_fails_integrity_and_cleans_up() {
        let log = CallLog::default();
        let svc = service(ScriptedGateway::new(log.clone()), true, settings());

        let err = svc.read(CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, ReadError::Integrity(_)));
        assert_eq!(err.kind(), ErrorKind::InternalError);
        assert_eq!(count(&log, "photo"), 0);
        assert_eq!(count(&log, "disconnect_card"), 1);
        assert_eq!(count(&log, "cleanup"), 1);
    }

    #[tokio::test]
    async fn stale_request_id_fails_integrity_even_when_signed() {
        let log = CallLog::default();
        let mut gateway = ScriptedGateway::new(log.clone());
        gateway.signed = true;
        gateway.echo_request_id = false;
        let svc = service(gateway, true, settings());

        let err = svc.read(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ReadError::Integrity(_)));

        let app: AppError = err.into();
        assert!(matches!(
            app,
            AppError::Read { kind: ErrorKind::InternalError, message: Some(ref m), .. } if m == INTEGRITY_FAILED
        ));
    }

    #[tokio::test]
    async fn cancelled_before_start_touches_nothing() {
        let log = CallLog::default();
        let svc = service(ScriptedGateway::new(log.clone()), false, settings());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = svc.read(cancel).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(calls(&log).is_empty());
    }

    #[tokio::test]
    async fn cancellation_mid_session_stops_and_cleans_up() {
        let log = CallLog::default();
        let cancel = CancellationToken::new();
        let mut gateway = ScriptedGateway::new(log.clone());
        gateway.cancel_on_connect = Some(cancel.clone());
        let svc = service(gateway, false, settings());

        let err = svc.read(cancel).await.unwrap_err();

        assert!(matches!(err, ReadError::Cancelled("reader_status")));
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(
            calls(&log),
            vec![
                "initialize",
                "list_readers",
                "select_reader",
                "connect_card",
                "disconnect_card",
                "cleanup",
            ]
        );
    }

    #[tokio::test]
    async fn deadline_is_a_timeout_and_reader_is_released_after_cleanup() {
        let log = CallLog::default();
        let mut gateway = ScriptedGateway::new(log.clone());
        gateway.read_delay = Duration::from_millis(300);
        let svc = service(
            gateway,
            false,
            ReaderSettings {
                read_timeout: Duration::from_millis(50),
                ..settings()
            },
        );

        let err = svc.read(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ReadError::DeadlineExceeded(_)));
        assert_eq!(err.kind(), ErrorKind::Timeout);

        // The blocking session finishes its current call, sees the
        // cancellation and releases the reader.
        let _reader = tokio::time::timeout(Duration::from_secs(5), svc.gateway.clone().lock_owned())
            .await
            .unwrap();
        assert_eq!(count(&log, "photo"), 0);
        assert_eq!(count(&log, "disconnect_card"), 1);
        assert_eq!(count(&log, "cleanup"), 1);
    }

    #[tokio::test]
    async fn reject_policy_fails_fast_while_reader_is_held() {
        let log = CallLog::default();
        let svc = service(
            ScriptedGateway::new(log.clone()),
            false,
            ReaderSettings {
                busy_policy: BusyPolicy::Reject,
                ..settings()
            },
        );

        let held = svc.gateway.clone().lock_owned().await;
        let err = svc.read(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ReadError::Busy));
        assert_eq!(err.kind(), ErrorKind::InternalError);
        drop(held);

        svc.read(CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn wait_policy_serializes_concurrent_reads() {
        let log = CallLog::default();
        let mut gateway = ScriptedGateway::new(log.clone());
        gateway.read_delay = Duration::from_millis(20);
        let svc = service(gateway, false, settings());

        let (a, b) = tokio::join!(
            svc.read(CancellationToken::new()),
            svc.read(CancellationToken::new())
        );
        a.unwrap();
        b.unwrap();

        let sequence = calls(&log);
        let first_cleanup = sequence.iter().position(|c| *c == "cleanup").unwrap();
        let second_init = sequence.iter().rposition(|c| *c == "initialize").unwrap();
        assert!(first_cleanup < second_init, "sessions overlapped: {sequence:?}");
    }

    #[tokio::test]
    async fn teardown_failures_do_not_override_success() {
        let log = CallLog::default();
        let mut gateway = ScriptedGateway::new(log.clone());
        gateway.disconnect_code = 9;
        gateway.cleanup_fails = true;
        let svc = service(gateway, false, settings());

        assert!(svc.read(CancellationToken::new()).await.is_ok());
        assert_eq!(count(&log, "cleanup"), 1);
    }

    #[tokio::test]
    async fn teardown_failures_do_not_override_the_primary_error() {
        let log = CallLog::default();
        let mut gateway = ScriptedGateway::new(log.clone());
        gateway.status = ReaderStatus::Timeout;
        gateway.cleanup_fails = true;
        let svc = service(gateway, false, settings());

        let err = svc.read(CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn missing_or_failing_photo_is_not_an_error() {
        for photo in [Ok(None), Ok(Some(Vec::new())), Err(())] {
            let log = CallLog::default();
            let mut gateway = ScriptedGateway::new(log.clone());
            gateway.photo = photo;
            let svc = service(gateway, false, settings());

            let result = svc.read(CancellationToken::new()).await.unwrap();
            assert_eq!(result.photo_base64, None);
        }
    }
}
