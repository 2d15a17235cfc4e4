use thiserror::Error;

/// Failure taxonomy shared by the wiki client and the maintenance tasks.
///
/// `Transport`, `Auth` and `Config` are raised as errors. The other variants
/// describe resolution outcomes when they have to be reported at a per-title
/// boundary; the resolver returns them as ordinary values.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("login failed: {0}")]
    Auth(String),

    #[error("no live page or move target for {title}")]
    NotFound { title: String },

    #[error("redirect loop: {}", chain.join(" -> "))]
    Cycle { chain: Vec<String> },

    #[error("redirect chain longer than {depth} hops: {}", chain.join(" -> "))]
    DepthExceeded { chain: Vec<String>, depth: usize },

    #[error("{title} redirects to itself")]
    SelfReference { title: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl BotError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::Config(_))
    }
}
