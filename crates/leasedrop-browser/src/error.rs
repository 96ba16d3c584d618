use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("interaction failed: {0}")]
    Interaction(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("chromium error: {0}")]
    Chromium(String),

    #[error("session already closed")]
    Closed,
}

impl From<chromiumoxide::error::CdpError> for BrowserError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        Self::Chromium(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BrowserError::Navigation("page not found".to_string());
        assert_eq!(err.to_string(), "navigation failed: page not found");
    }

    #[test]
    fn test_element_not_found_names_locator() {
        let err = BrowserError::ElementNotFound("css `#leaseNum`".to_string());
        assert!(err.to_string().contains("#leaseNum"));
    }
}
