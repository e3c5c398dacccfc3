//! One-shot replies handed to application callbacks.
//!
//! Each reply is consumed by value when the application answers. Dropping an
//! unanswered reply sends the conservative default (cancel, deny, do not
//! resend), so a callback that ignores its reply can never stall the page.

use std::fmt;

struct Reply<T: Default> {
    send: Option<Box<dyn FnOnce(T) + Send + 'static>>,
}

impl<T: Default> Reply<T> {
    fn new(send: impl FnOnce(T) + Send + 'static) -> Self {
        Self {
            send: Some(Box::new(send)),
        }
    }

    fn complete(mut self, value: T) {
        if let Some(send) = self.send.take() {
            send(value);
        }
    }
}

impl<T: Default> Drop for Reply<T> {
    fn drop(&mut self) {
        if let Some(send) = self.send.take() {
            send(T::default());
        }
    }
}

/// Answer to an alert, confirm or before-unload dialog.
pub struct JsResult {
    reply: Reply<bool>,
}

impl JsResult {
    /// `receiver` gets `true` on confirm and `false` on cancel.
    pub fn new(receiver: impl FnOnce(bool) + Send + 'static) -> Self {
        Self {
            reply: Reply::new(receiver),
        }
    }

    pub fn confirm(self) {
        self.reply.complete(true);
    }

    pub fn cancel(self) {
        self.reply.complete(false);
    }
}

impl fmt::Debug for JsResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JsResult")
    }
}

/// Answer to a prompt dialog.
pub struct JsPromptResult {
    reply: Reply<Option<String>>,
}

impl JsPromptResult {
    /// `receiver` gets the entered text on confirm and `None` on cancel.
    pub fn new(receiver: impl FnOnce(Option<String>) + Send + 'static) -> Self {
        Self {
            reply: Reply::new(receiver),
        }
    }

    pub fn confirm(self, value: impl Into<String>) {
        self.reply.complete(Some(value.into()));
    }

    pub fn cancel(self) {
        self.reply.complete(None);
    }
}

impl fmt::Debug for JsPromptResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JsPromptResult")
    }
}

/// Credentials for an HTTP authentication challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

pub struct HttpAuthHandler {
    reply: Reply<Option<Credentials>>,
    first_attempt: bool,
}

impl HttpAuthHandler {
    pub fn new(
        first_attempt: bool,
        receiver: impl FnOnce(Option<Credentials>) + Send + 'static,
    ) -> Self {
        Self {
            reply: Reply::new(receiver),
            first_attempt,
        }
    }

    /// Missing username or password are sent as empty strings.
    pub fn proceed(self, username: Option<&str>, password: Option<&str>) {
        self.reply.complete(Some(Credentials {
            username: username.unwrap_or_default().to_string(),
            password: password.unwrap_or_default().to_string(),
        }));
    }

    pub fn cancel(self) {
        self.reply.complete(None);
    }

    /// Stored credentials are only worth trying on the first attempt.
    pub fn use_http_auth_username_password(&self) -> bool {
        self.first_attempt
    }
}

impl fmt::Debug for HttpAuthHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpAuthHandler")
            .field("first_attempt", &self.first_attempt)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SslErrorKind {
    NotYetValid,
    Expired,
    IdMismatch,
    Untrusted,
    DateInvalid,
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SslError {
    pub url: String,
    pub primary_error: SslErrorKind,
}

pub struct SslErrorHandler {
    reply: Reply<bool>,
}

impl SslErrorHandler {
    /// `receiver` gets `true` to proceed past the error.
    pub fn new(receiver: impl FnOnce(bool) + Send + 'static) -> Self {
        Self {
            reply: Reply::new(receiver),
        }
    }

    pub fn proceed(self) {
        self.reply.complete(true);
    }

    pub fn cancel(self) {
        self.reply.complete(false);
    }
}

impl fmt::Debug for SslErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SslErrorHandler")
    }
}

/// Whether to resend POST data when reloading a page that was a form
/// submission.
pub struct FormResubmission {
    reply: Reply<bool>,
}

impl FormResubmission {
    /// `receiver` gets `true` to resend.
    pub fn new(receiver: impl FnOnce(bool) + Send + 'static) -> Self {
        Self {
            reply: Reply::new(receiver),
        }
    }

    pub fn resend(self) {
        self.reply.complete(true);
    }

    pub fn dont_resend(self) {
        self.reply.complete(false);
    }
}

impl fmt::Debug for FormResubmission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FormResubmission")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeolocationDecision {
    pub allow: bool,
    pub retain: bool,
}

/// Answer to a geolocation permission prompt for one origin.
pub struct GeolocationCallback {
    origin: String,
    reply: Reply<GeolocationDecision>,
}

impl GeolocationCallback {
    pub fn new(
        origin: impl Into<String>,
        receiver: impl FnOnce(GeolocationDecision) + Send + 'static,
    ) -> Self {
        Self {
            origin: origin.into(),
            reply: Reply::new(receiver),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn invoke(self, allow: bool, retain: bool) {
        self.reply.complete(GeolocationDecision { allow, retain });
    }
}

impl fmt::Debug for GeolocationCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeolocationCallback")
            .field("origin", &self.origin)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn capture<T: Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl FnOnce(T) + Send + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |v| sink.lock().push(v))
    }

    #[test]
    fn explicit_answer_is_delivered_once() {
        let (seen, rx) = capture();
        JsResult::new(rx).confirm();
        assert_eq!(*seen.lock(), vec![true]);
    }

    #[test]
    fn dropped_replies_fall_back_to_the_safe_answer() {
        let (dialogs, rx) = capture();
        drop(JsResult::new(rx));
        assert_eq!(*dialogs.lock(), vec![false]);

        let (prompts, rx) = capture();
        drop(JsPromptResult::new(rx));
        assert_eq!(*prompts.lock(), vec![None]);

        let (forms, rx) = capture();
        drop(FormResubmission::new(rx));
        assert_eq!(*forms.lock(), vec![false]);

        let (geo, rx) = capture();
        drop(GeolocationCallback::new("https://maps.test", rx));
        assert_eq!(*geo.lock(), vec![GeolocationDecision::default()]);
    }

    #[test]
    fn auth_proceed_fills_missing_fields() {
        let (seen, rx) = capture();
        let handler = HttpAuthHandler::new(true, rx);
        assert!(handler.use_http_auth_username_password());
        handler.proceed(Some("user"), None);
        assert_eq!(
            *seen.lock(),
            vec![Some(Credentials {
                username: "user".into(),
                password: String::new(),
            })]
        );
    }

    #[test]
    fn prompt_confirm_carries_the_text() {
        let (seen, rx) = capture();
        JsPromptResult::new(rx).confirm("42");
        assert_eq!(*seen.lock(), vec![Some("42".to_string())]);
    }
}
