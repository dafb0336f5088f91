use crate::error::ErrorKind;
use crate::models::card::ReaderStatus;

/// Maps a reader status to the error the caller sees.
///
/// `Ready` has no error and maps to `None`.
pub fn status_error(status: ReaderStatus) -> Option<ErrorKind> {
    let kind = match status {
        ReaderStatus::Ready => return None,
        ReaderStatus::CardNotPresent | ReaderStatus::CardNotConnected => ErrorKind::CardNotPresent,
        ReaderStatus::ReaderNotFound | ReaderStatus::ReaderNotSelected => ErrorKind::ReaderNotFound,
        ReaderStatus::Timeout => ErrorKind::Timeout,
        ReaderStatus::Busy | ReaderStatus::ToolkitNotInitialized | ReaderStatus::Unknown => {
            ErrorKind::InternalError
        }
    };
    Some(kind)
}

/// Maps a toolkit result code to the error the caller sees.
///
/// `0` is success and maps to `None`. Every other code maps to exactly one
/// kind; codes the toolkit does not document land on `InternalError`.
pub fn result_code_error(code: i32) -> Option<ErrorKind> {
    if code == 0 {
        return None;
    }
    Some(status_error(ReaderStatus::from_code(code)).unwrap_or(ErrorKind::InternalError))
}
