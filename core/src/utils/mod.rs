use std::any::Any;

/// Extract a printable message from a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(error_msg) = payload.downcast_ref::<&str>() {
        (*error_msg).to_string()
    } else if let Some(error_msg) = payload.downcast_ref::<String>() {
        error_msg.clone()
    } else {
        "Unknown panic payload".to_string()
    }
}
