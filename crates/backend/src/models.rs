// Database models for Diesel
use diesel::prelude::*;
use shared_types::{StoreEmailRequest, Verdict};

/// Insertable struct for new scan records
#[derive(Debug, Clone, PartialEq, Eq, Insertable)]
#[diesel(table_name = crate::schema::scanned_emails)]
pub struct NewScanRecord {
    pub user_email: String,
    pub subject: String,
    pub sender: String,
    pub date: String,
    pub body: String,
    pub status: String,
    pub created_at: i64,
}

impl NewScanRecord {
    /// Build a record stamped with the current time.
    pub fn new(
        user_email: impl Into<String>,
        subject: impl Into<String>,
        sender: impl Into<String>,
        date: impl Into<String>,
        body: impl Into<String>,
        verdict: Verdict,
    ) -> Self {
        Self {
            user_email: user_email.into(),
            subject: subject.into(),
            sender: sender.into(),
            date: date.into(),
            body: body.into(),
            status: verdict.as_str().to_string(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    /// True if `other` names the same logical email (user, subject, sender, date).
    pub fn same_identity(&self, other: &shared_types::ScanRecord) -> bool {
        self.user_email == other.user_email
            && self.subject == other.subject
            && self.sender == other.sender
            && self.date == other.date
    }

    pub fn from_request(req: StoreEmailRequest, verdict: Verdict) -> Self {
        Self::new(
            req.user_email,
            req.subject,
            req.sender,
            req.date,
            req.body,
            verdict,
        )
    }
}
