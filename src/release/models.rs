use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named release channel carrying the sign-off policy for its releases.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stream {
    pub id: i64,
    pub name: String,
    pub require_signoff: bool,
    /// Free text as entered by the user; see [`Stream::email_list`].
    pub signoff_list: String,
    /// Minimum signed count. 0 means every listed address must sign.
    pub quorum: i64,
}

impl Stream {
    /// Addresses parsed from `signoff_list`.
    ///
    /// Text without any `@` yields nothing. Otherwise carriage returns,
    /// newlines and commas all act as separators. Duplicates are kept.
    pub fn email_list(&self) -> Vec<String> {
        parse_email_list(&self.signoff_list)
    }

    /// Sign-offs needed before a release on this stream may proceed.
    pub fn required_signatures(&self) -> i64 {
        if self.quorum == 0 {
            self.email_list().len() as i64
        } else {
            self.quorum
        }
    }
}

pub fn parse_email_list(text: &str) -> Vec<String> {
    if !text.contains('@') {
        return Vec::new();
    }
    text.replace(['\r', '\n', ','], " ")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Input for creating a stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewStream {
    pub name: String,
    #[serde(default)]
    pub require_signoff: bool,
    #[serde(default)]
    pub signoff_list: String,
    #[serde(default)]
    pub quorum: i64,
}

impl NewStream {
    /// Reject quorum values no release on this stream could ever satisfy.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("stream name must not be empty".to_string());
        }
        if self.quorum < 0 {
            return Err(format!("quorum must be 0 or positive, got {}", self.quorum));
        }
        if self.require_signoff {
            let listed = parse_email_list(&self.signoff_list).len() as i64;
            if listed == 0 {
                return Err("sign-off is required but the sign-off list has no addresses".to_string());
            }
            if self.quorum > listed {
                return Err(format!(
                    "quorum {} exceeds the {} address(es) in the sign-off list",
                    self.quorum, listed
                ));
            }
        }
        Ok(())
    }
}

/// One build promoted toward deployment through a stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Release {
    pub id: i64,
    pub stream_id: i64,
    pub build_id: i64,
    pub release_date: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    /// True until the deployment has executed.
    pub waiting: bool,
    /// Set by whoever claimed the release for dispatch.
    pub locked: bool,
}

/// Input for pushing a build onto a stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRelease {
    pub stream_id: i64,
    pub build_id: i64,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// A signature request for one address on one release.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReleaseSignoff {
    pub id: i64,
    pub release_id: i64,
    pub signature: String,
    pub token: String,
    pub signed: bool,
}

impl ReleaseSignoff {
    /// Capability link for this sign-off under `public_url` (no trailing slash).
    pub fn sign_url(&self, public_url: &str) -> String {
        format!("{}/sign/{}", public_url, self.token)
    }
}

/// Fresh capability token for a sign link.
pub fn new_signoff_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Externally observable state of a release.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReleaseState {
    Deployed,
    AwaitingSignoff { remaining: i64 },
    Scheduled { at: DateTime<Utc> },
    Running,
}

impl ReleaseState {
    /// Numeric code used by dashboards: 1 deployed, 2 scheduled, 3 awaiting
    /// sign-off, 4 running.
    pub fn code(&self) -> u8 {
        match self {
            Self::Deployed => 1,
            Self::Scheduled { .. } => 2,
            Self::AwaitingSignoff { .. } => 3,
            Self::Running => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deployed => "deployed",
            Self::AwaitingSignoff { .. } => "awaiting_signoff",
            Self::Scheduled { .. } => "scheduled",
            Self::Running => "running",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Deployed => "Deployed".to_string(),
            Self::Scheduled { at } => {
                format!("Scheduled for {} (UTC)", at.format("%d-%m-%Y @ %H:%M"))
            }
            Self::AwaitingSignoff { remaining } => format!(
                "Waiting for {} signature{}",
                remaining,
                if *remaining > 1 { "s" } else { "" }
            ),
            Self::Running => "Running...".to_string(),
        }
    }
}
