//! Filters available without registration

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use super::{Filter, FilterError, FilterOptions};

/// Upper-cases its input
#[derive(Debug, Clone, Copy, Default)]
pub struct Upper;

impl Filter for Upper {
    fn render(&self, text: &str, _options: &FilterOptions) -> Result<String, FilterError> {
        Ok(text.to_uppercase())
    }
}

/// Base64-encodes its input; raw includes are encoded from their bytes
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64;

impl Filter for Base64 {
    fn render(&self, text: &str, _options: &FilterOptions) -> Result<String, FilterError> {
        Ok(STANDARD.encode(text.as_bytes()))
    }

    fn accepts_buffer(&self) -> bool {
        true
    }

    fn render_buffer(&self, raw: &[u8], _options: &FilterOptions) -> Result<String, FilterError> {
        Ok(STANDARD.encode(raw))
    }
}
