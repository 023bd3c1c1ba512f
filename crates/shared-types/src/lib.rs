use serde::{Deserialize, Serialize};

/// Scanned email row, matching the `scanned_emails` column order exactly
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "diesel", derive(diesel::Queryable))]
pub struct ScanRecord {
    pub id: i32,
    pub user_email: String,
    pub subject: String,
    pub sender: String,
    pub date: String, // provider timestamp, kept as sent
    pub body: String,
    pub status: String, // stored as VARCHAR: "Phishing", "Safe", "Not Phishing"
    pub created_at: i64, // unix seconds
}

/// Classification outcome for one email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Phishing,
    Safe,
    #[serde(rename = "Not Phishing")]
    NotPhishing,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Phishing => "Phishing",
            Verdict::Safe => "Safe",
            Verdict::NotPhishing => "Not Phishing",
        }
    }

    /// Parse any label the classifier or a client may produce.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Phishing" => Some(Verdict::Phishing),
            "Safe" => Some(Verdict::Safe),
            "Not Phishing" => Some(Verdict::NotPhishing),
            _ => None,
        }
    }

    /// Parse a label a user may set by hand. Only "Phishing" and "Safe" are accepted.
    pub fn parse_user_override(s: &str) -> Option<Self> {
        match Self::parse(s)? {
            Verdict::NotPhishing => None,
            v => Some(v),
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Placeholder verdict for a body the classifier could not score.
pub const VERDICT_ERROR: &str = "error";

// API Request/Response types

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PredictRequest {
    pub emails: Vec<String>,
}

/// Body of `POST /store-email` and `POST /store-scanned-email`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreEmailRequest {
    pub user_email: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub body: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

/// Query parameters for `GET /phishing-emails`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhishingEmailsQuery {
    pub user_email: Option<String>,
}

/// Query parameters for `GET /emails`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailListQuery {
    pub user_id: Option<String>,
}
