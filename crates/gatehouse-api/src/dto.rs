//! Shared request/response shapes

use serde::{Deserialize, Serialize};

/// Success envelope; errors use `{error: {message, code}}` (see
/// [`crate::error::ApiFailure`]).
#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub data: T,
}

impl<T> DataResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct PageQuery {
    pub offset: usize,
    pub limit: usize,
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}
