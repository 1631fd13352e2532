//! Plain-text templates for invitation and reminder emails.

use chrono::{DateTime, Utc};

use crate::{EmailKind, OutgoingEmail};

/// Everything a session email needs to say.
#[derive(Debug, Clone)]
pub struct InvitationDetails<'a> {
    /// Student display name.
    pub student_name: &'a str,
    /// Tutor display name.
    pub tutor_name: &'a str,
    /// Session subject.
    pub subject: &'a str,
    /// Session start.
    pub starts_at: DateTime<Utc>,
    /// Session end.
    pub ends_at: DateTime<Utc>,
    /// Human label for the session format, e.g. "group".
    pub format: &'a str,
    /// Link where the student answers the invitation.
    pub respond_url: &'a str,
}

impl InvitationDetails<'_> {
    fn when(&self) -> String {
        if self.starts_at.date_naive() == self.ends_at.date_naive() {
            format!(
                "{} - {} UTC",
                self.starts_at.format("%Y-%m-%d %H:%M"),
                self.ends_at.format("%H:%M")
            )
        } else {
            format!(
                "{} - {} UTC",
                self.starts_at.format("%Y-%m-%d %H:%M"),
                self.ends_at.format("%Y-%m-%d %H:%M")
            )
        }
    }
}

/// Renders the invitation email (also used for resends).
#[must_use]
pub fn invitation_email(to: &str, details: &InvitationDetails<'_>) -> OutgoingEmail {
    let text_body = format!(
        "Hi {student},\n\n\
         {tutor} has invited you to a tutoring session.\n\n\
         Subject: {subject}\n\
         When: {when}\n\
         Format: {format}\n\n\
         Confirm, decline or propose another time here:\n\
         {url}\n\n\
         See you there!\n\
         EduBridge",
        student = details.student_name,
        tutor = details.tutor_name,
        subject = details.subject,
        when = details.when(),
        format = details.format,
        url = details.respond_url,
    );

    OutgoingEmail {
        to: to.to_string(),
        to_name: details.student_name.to_string(),
        subject: format!("Invitation: {} with {}", details.subject, details.tutor_name),
        text_body,
        kind: EmailKind::Invitation,
        reference: None,
    }
}

/// Renders the reminder for an unanswered invitation.
#[must_use]
pub fn reminder_email(to: &str, details: &InvitationDetails<'_>) -> OutgoingEmail {
    let text_body = format!(
        "Hi {student},\n\n\
         {tutor} is still waiting for your answer to this session:\n\n\
         Subject: {subject}\n\
         When: {when}\n\n\
         Let them know whether you can make it:\n\
         {url}\n\n\
         EduBridge",
        student = details.student_name,
        tutor = details.tutor_name,
        subject = details.subject,
        when = details.when(),
        url = details.respond_url,
    );

    OutgoingEmail {
        to: to.to_string(),
        to_name: details.student_name.to_string(),
        subject: format!("Reminder: {} with {}", details.subject, details.tutor_name),
        text_body,
        kind: EmailKind::Reminder,
        reference: None,
    }
}
