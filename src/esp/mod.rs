//! ESP-IDF implementations of the board seams.

pub mod hardware;
pub mod mesh;
pub mod storage;
pub mod system;

use crate::error::NodeError;
use esp_idf_sys::{self as sys, esp_err_t, EspError};

pub(crate) fn esp_err_to_node(code: esp_err_t) -> NodeError {
    match code {
        sys::ESP_ERR_NO_MEM => NodeError::NoMem,
        sys::ESP_ERR_INVALID_ARG | sys::ESP_ERR_INVALID_SIZE => NodeError::InvalidArg,
        sys::ESP_ERR_INVALID_STATE => NodeError::InvalidState,
        sys::ESP_ERR_NOT_FOUND => NodeError::NotFound,
        other => NodeError::TransportFailure(other),
    }
}

impl From<EspError> for NodeError {
    fn from(e: EspError) -> Self {
        esp_err_to_node(e.code())
    }
}
