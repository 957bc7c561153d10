// src/error.rs
use thiserror::Error;

/// Why a wall was hit on a detail page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Captcha,
    LoginWall,
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockKind::Captcha => write!(f, "captcha"),
            BlockKind::LoginWall => write!(f, "login wall"),
        }
    }
}

/// Per-job failures. None of these are fatal for a run.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("navigation to {url} failed after {attempts} attempt(s): {reason}")]
    Navigation {
        url: String,
        attempts: u32,
        reason: String,
    },

    #[error("{kind} detected at {url}")]
    Blocked { kind: BlockKind, url: String },

    #[error("no element matched {selector}")]
    ElementNotFound { selector: String },

    #[error("could not parse {field} from {input:?}")]
    Parse { field: &'static str, input: String },

    #[error("failed to persist {link}: {source}")]
    Persistence {
        link: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("browser error: {0}")]
    Browser(String),
}

impl ScrapeError {
    pub fn browser(err: impl std::fmt::Display) -> Self {
        ScrapeError::Browser(err.to_string())
    }
}
