//! SSH user authentication (RFC 4252).
//!
//! This module contains the USERAUTH_* messages, the [`AuthPolicy`] trait that
//! decides whether a request is accepted, a default in-memory [`PasswordTable`]
//! policy, and the [`Authenticator`] that keeps the per-connection bookkeeping
//! (succeeded methods, attempt counter, banner).
//!
//! # Security
//!
//! - **Constant-time password comparison** - Prevents timing attacks
//! - **Passwords zeroized on drop**
//!
//! # Example
//!
//! ```rust
//! use cssh_proto::ssh::auth::{AuthMethod, AuthRequest};
//!
//! let auth = AuthRequest::new(
//!     "user",
//!     "ssh-connection",
//!     AuthMethod::password("secret"),
//! );
//! assert_eq!(auth.method().name(), "password");
//! ```

use crate::ssh::message::{expect_type, start, Message, MessageType};
use crate::ssh::wire::{
    read_bool, read_bytes, read_name_list, read_string, write_bool, write_bytes, write_name_list,
    write_string,
};
use cssh_platform::{CsshError, CsshResult};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use zeroize::Zeroize;

/// The only service that may follow authentication.
pub const CONNECTION_SERVICE: &str = "ssh-connection";

/// SSH authentication method, tagged by method name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// "none": probe for the list of acceptable methods.
    None,
    /// "password" (RFC 4252 Section 8).
    Password {
        /// Current password
        password: String,
        /// Replacement password, present when the client answers a change request
        new_password: Option<String>,
    },
    /// "publickey" (RFC 4252 Section 7).
    PublicKey {
        /// Algorithm name (e.g., "rsa-sha2-256")
        algorithm: String,
        /// Public key blob
        blob: Vec<u8>,
        /// Signature (if present)
        signature: Option<Vec<u8>>,
    },
    /// "hostbased" (RFC 4252 Section 9).
    HostBased {
        /// Public key algorithm for host key
        algorithm: String,
        /// Client host key blob
        host_key: Vec<u8>,
        /// Client host name (FQDN)
        host_name: String,
        /// User name on the client host
        client_user: String,
        /// Signature
        signature: Vec<u8>,
    },
    /// Any other method name; carries no parsed fields.
    Other(String),
}

impl AuthMethod {
    /// Shorthand for a password request without a new password.
    pub fn password(password: impl Into<String>) -> Self {
        AuthMethod::Password {
            password: password.into(),
            new_password: None,
        }
    }

    /// Returns the method name.
    pub fn name(&self) -> &str {
        match self {
            AuthMethod::None => "none",
            AuthMethod::Password { .. } => "password",
            AuthMethod::PublicKey { .. } => "publickey",
            AuthMethod::HostBased { .. } => "hostbased",
            AuthMethod::Other(name) => name,
        }
    }
}

impl Drop for AuthMethod {
    fn drop(&mut self) {
        if let AuthMethod::Password {
            password,
            new_password,
        } = self
        {
            password.zeroize();
            if let Some(p) = new_password {
                p.zeroize();
            }
        }
    }
}

/// SSH_MSG_USERAUTH_REQUEST message (RFC 4252 Section 5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    user_name: String,
    service_name: String,
    method: AuthMethod,
}

impl AuthRequest {
    /// Creates a new authentication request.
    pub fn new(user_name: &str, service_name: &str, method: AuthMethod) -> Self {
        Self {
            user_name: user_name.to_string(),
            service_name: service_name.to_string(),
            method,
        }
    }

    /// Returns the user name.
    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    /// Returns the service name.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Returns the authentication method.
    pub fn method(&self) -> &AuthMethod {
        &self.method
    }

    /// Serializes the authentication request to bytes.
    ///
    /// Format (RFC 4252 Section 5):
    /// ```text
    /// byte      SSH_MSG_USERAUTH_REQUEST (50)
    /// string    user name
    /// string    service name
    /// string    method name
    /// ....      method specific fields
    /// ```
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = start(MessageType::UserauthRequest);
        write_string(&mut buf, &self.user_name);
        write_string(&mut buf, &self.service_name);
        write_string(&mut buf, self.method.name());

        match &self.method {
            AuthMethod::None | AuthMethod::Other(_) => {}
            AuthMethod::Password {
                password,
                new_password,
            } => {
                write_bool(&mut buf, new_password.is_some());
                write_string(&mut buf, password);
                if let Some(new_password) = new_password {
                    write_string(&mut buf, new_password);
                }
            }
            AuthMethod::PublicKey {
                algorithm,
                blob,
                signature,
            } => {
                write_bool(&mut buf, signature.is_some());
                write_string(&mut buf, algorithm);
                write_bytes(&mut buf, blob);
                if let Some(sig) = signature {
                    write_bytes(&mut buf, sig);
                }
            }
            AuthMethod::HostBased {
                algorithm,
                host_key,
                host_name,
                client_user,
                signature,
            } => {
                write_string(&mut buf, algorithm);
                write_bytes(&mut buf, host_key);
                write_string(&mut buf, host_name);
                write_string(&mut buf, client_user);
                write_bytes(&mut buf, signature);
            }
        }

        buf.to_vec()
    }

    /// Parses an authentication request from bytes.
    ///
    /// Unknown method names parse as [`AuthMethod::Other`] so the caller can
    /// answer with USERAUTH_FAILURE instead of dropping the connection.
    pub fn from_bytes(data: &[u8]) -> CsshResult<Self> {
        let mut offset = expect_type(data, MessageType::UserauthRequest)?;

        let user_name = read_string(data, &mut offset)?;
        let service_name = read_string(data, &mut offset)?;
        let method_name = read_string(data, &mut offset)?;

        let method = match method_name.as_str() {
            "none" => AuthMethod::None,
            "password" => {
                let changing = read_bool(data, &mut offset)?;
                let password = read_string(data, &mut offset)?;
                let new_password = if changing {
                    Some(read_string(data, &mut offset)?)
                } else {
                    None
                };
                AuthMethod::Password {
                    password,
                    new_password,
                }
            }
            "publickey" => {
                let has_signature = read_bool(data, &mut offset)?;
                let algorithm = read_string(data, &mut offset)?;
                let blob = read_bytes(data, &mut offset)?;
                let signature = if has_signature {
                    Some(read_bytes(data, &mut offset)?)
                } else {
                    None
                };
                AuthMethod::PublicKey {
                    algorithm,
                    blob,
                    signature,
                }
            }
            "hostbased" => AuthMethod::HostBased {
                algorithm: read_string(data, &mut offset)?,
                host_key: read_bytes(data, &mut offset)?,
                host_name: read_string(data, &mut offset)?,
                client_user: read_string(data, &mut offset)?,
                signature: read_bytes(data, &mut offset)?,
            },
            _ => AuthMethod::Other(method_name),
        };

        Ok(Self {
            user_name,
            service_name,
            method,
        })
    }
}

/// SSH_MSG_USERAUTH_FAILURE message (RFC 4252 Section 5.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFailure {
    methods_can_continue: Vec<String>,
    partial_success: bool,
}

impl AuthFailure {
    /// Creates a new failure message.
    pub fn new(methods: Vec<String>, partial_success: bool) -> Self {
        Self {
            methods_can_continue: methods,
            partial_success,
        }
    }

    /// Returns the methods that can continue.
    pub fn methods_can_continue(&self) -> &[String] {
        &self.methods_can_continue
    }

    /// Returns whether the previous request partially succeeded.
    pub fn partial_success(&self) -> bool {
        self.partial_success
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = start(MessageType::UserauthFailure);
        write_name_list(&mut buf, &self.methods_can_continue);
        write_bool(&mut buf, self.partial_success);
        buf.to_vec()
    }

    /// Parses from bytes.
    pub fn from_bytes(data: &[u8]) -> CsshResult<Self> {
        let mut offset = expect_type(data, MessageType::UserauthFailure)?;
        Ok(Self {
            methods_can_continue: read_name_list(data, &mut offset)?,
            partial_success: read_bool(data, &mut offset)?,
        })
    }
}

/// SSH_MSG_USERAUTH_BANNER message (RFC 4252 Section 5.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthBanner {
    message: String,
    language_tag: String,
}

impl AuthBanner {
    /// Creates a new banner message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            language_tag: String::new(),
        }
    }

    /// Returns the banner text.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = start(MessageType::UserauthBanner);
        write_string(&mut buf, &self.message);
        write_string(&mut buf, &self.language_tag);
        buf.to_vec()
    }

    /// Parses from bytes.
    pub fn from_bytes(data: &[u8]) -> CsshResult<Self> {
        let mut offset = expect_type(data, MessageType::UserauthBanner)?;
        Ok(Self {
            message: read_string(data, &mut offset)?,
            language_tag: read_string(data, &mut offset)?,
        })
    }
}

/// SSH_MSG_USERAUTH_PASSWD_CHANGEREQ message (RFC 4252 Section 8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPasswdChangeReq {
    prompt: String,
    language_tag: String,
}

impl AuthPasswdChangeReq {
    /// Creates a change request with the given prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            language_tag: String::new(),
        }
    }

    /// Returns the prompt.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = start(MessageType::UserauthPasswdChangereq);
        write_string(&mut buf, &self.prompt);
        write_string(&mut buf, &self.language_tag);
        buf.to_vec()
    }

    /// Parses from bytes.
    pub fn from_bytes(data: &[u8]) -> CsshResult<Self> {
        let mut offset = expect_type(data, MessageType::UserauthPasswdChangereq)?;
        Ok(Self {
            prompt: read_string(data, &mut offset)?,
            language_tag: read_string(data, &mut offset)?,
        })
    }
}

/// Compares two passwords in constant time.
///
/// Both inputs are hashed first so the comparison does not leak their lengths.
///
/// ```rust
/// use cssh_proto::ssh::auth::constant_time_compare;
///
/// assert!(constant_time_compare("secret", "secret"));
/// assert!(!constant_time_compare("secret", "wrong"));
/// ```
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    let hash_a = Sha256::digest(a.as_bytes());
    let hash_b = Sha256::digest(b.as_bytes());
    hash_a.ct_eq(&hash_b).into()
}

/// Verdict of an [`AuthPolicy`] for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    /// The method succeeded.
    Accept,
    /// The method failed; `partial_success` is reported to the client.
    Reject {
        /// Whether the request succeeded but more methods are required
        partial_success: bool,
    },
    /// The password is correct but expired; the client must choose a new one.
    PasswordChangeRequired {
        /// Prompt shown to the user
        prompt: String,
    },
}

/// Decides whether authentication requests succeed.
///
/// The session only plumbs requests to the policy and relays its verdict.
pub trait AuthPolicy: Send + Sync {
    /// Method names this policy can accept, in preference order.
    fn methods(&self) -> Vec<String>;

    /// Judges a request whose service is `ssh-connection`.
    fn authenticate(&self, request: &AuthRequest) -> AuthDecision;
}

struct Credential {
    password: String,
    must_change: bool,
}

impl Drop for Credential {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

/// In-memory user → password table.
///
/// Entries flagged `must_change` answer a correct password with a change
/// request; a subsequent request carrying a new password replaces the entry.
#[derive(Default)]
pub struct PasswordTable {
    users: RwLock<HashMap<String, Credential>>,
}

impl std::fmt::Debug for PasswordTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.users.read().map(|u| u.len()).unwrap_or(0);
        f.debug_struct("PasswordTable")
            .field("users", &count)
            .finish()
    }
}

impl PasswordTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a user.
    pub fn insert(&self, user: &str, password: &str, must_change: bool) {
        if let Ok(mut users) = self.users.write() {
            users.insert(
                user.to_string(),
                Credential {
                    password: password.to_string(),
                    must_change,
                },
            );
        }
    }

    /// Builder-style variant of [`PasswordTable::insert`].
    pub fn with_user(self, user: &str, password: &str, must_change: bool) -> Self {
        self.insert(user, password, must_change);
        self
    }

    fn check_password(&self, user: &str, password: &str, new_password: Option<&str>) -> AuthDecision {
        let reject = AuthDecision::Reject {
            partial_success: false,
        };
        let Ok(mut users) = self.users.write() else {
            return reject;
        };
        let Some(entry) = users.get_mut(user) else {
            return reject;
        };
        if !constant_time_compare(&entry.password, password) {
            return reject;
        }

        match new_password {
            Some(new_password) => {
                entry.password.zeroize();
                entry.password = new_password.to_string();
                entry.must_change = false;
                AuthDecision::Accept
            }
            None if entry.must_change => AuthDecision::PasswordChangeRequired {
                prompt: "Password expired, please choose a new one".to_string(),
            },
            None => AuthDecision::Accept,
        }
    }
}

impl AuthPolicy for PasswordTable {
    fn methods(&self) -> Vec<String> {
        vec!["password".to_string()]
    }

    fn authenticate(&self, request: &AuthRequest) -> AuthDecision {
        match request.method() {
            AuthMethod::Password {
                password,
                new_password,
            } => self.check_password(request.user_name(), password, new_password.as_deref()),
            _ => AuthDecision::Reject {
                partial_success: false,
            },
        }
    }
}

/// Authentication settings carried by the session.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// When false, the "none" method succeeds
    pub auth_required: bool,
    /// Optional USERAUTH_BANNER text
    pub banner: Option<String>,
    /// Failures allowed before disconnecting
    pub max_attempts: u32,
}

/// Per-connection authentication bookkeeping.
pub struct Authenticator {
    policy: Arc<dyn AuthPolicy>,
    settings: AuthSettings,
    last_user: Option<String>,
    last_service: Option<String>,
    succeeded: Vec<String>,
    failures: u32,
    banner_sent: bool,
    authenticated_user: Option<String>,
}

impl Authenticator {
    /// Creates a fresh authenticator.
    pub fn new(policy: Arc<dyn AuthPolicy>, settings: AuthSettings) -> Self {
        Self {
            policy,
            settings,
            last_user: None,
            last_service: None,
            succeeded: Vec::new(),
            failures: 0,
            banner_sent: false,
            authenticated_user: None,
        }
    }

    /// Returns true once a request has succeeded.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated_user.is_some()
    }

    /// Returns the authenticated user name.
    pub fn user(&self) -> Option<&str> {
        self.authenticated_user.as_deref()
    }

    fn remaining(&self) -> Vec<String> {
        self.policy
            .methods()
            .into_iter()
            .filter(|m| !self.succeeded.contains(m))
            .collect()
    }

    fn failure(&mut self, partial_success: bool) -> CsshResult<Message> {
        self.failures += 1;
        if self.failures >= self.settings.max_attempts {
            warn!(failures = self.failures, "Too many authentication failures");
            return Err(CsshError::Disconnected {
                reason: crate::ssh::message::DisconnectReason::NoMoreAuthMethodsAvailable as u32,
                description: "Too many authentication failures".to_string(),
            });
        }
        Ok(Message::UserauthFailure(AuthFailure::new(
            self.remaining(),
            partial_success,
        )))
    }

    /// Handles one USERAUTH_REQUEST and returns the messages to send, in order.
    ///
    /// # Errors
    ///
    /// Returns [`CsshError::Disconnected`] when the session must end:
    /// a service other than `ssh-connection`, or too many failures.
    pub fn handle_request(&mut self, request: &AuthRequest) -> CsshResult<Vec<Message>> {
        if self.last_user.as_deref() != Some(request.user_name())
            || self.last_service.as_deref() != Some(request.service_name())
        {
            self.succeeded.clear();
            self.last_user = Some(request.user_name().to_string());
            self.last_service = Some(request.service_name().to_string());
        }

        if request.service_name() != CONNECTION_SERVICE {
            return Err(CsshError::Disconnected {
                reason: crate::ssh::message::DisconnectReason::ServiceNotAvailable as u32,
                description: format!("Service not available: {}", request.service_name()),
            });
        }

        let mut out = Vec::with_capacity(2);
        if !self.banner_sent {
            self.banner_sent = true;
            if let Some(banner) = &self.settings.banner {
                out.push(Message::UserauthBanner(AuthBanner::new(banner.clone())));
            }
        }

        let method = request.method().name().to_string();
        let decision = match request.method() {
            AuthMethod::None if !self.settings.auth_required => AuthDecision::Accept,
            AuthMethod::None => AuthDecision::Reject {
                partial_success: true,
            },
            AuthMethod::Password { .. } => self.policy.authenticate(request),
            _ => AuthDecision::Reject {
                partial_success: false,
            },
        };

        let partial_success = matches!(
            decision,
            AuthDecision::Reject {
                partial_success: true
            }
        );
        let reply = match self.apply(decision, request.user_name(), method) {
            Ok(reply) => reply,
            Err(e) if e.is_recoverable() => {
                warn!(user = request.user_name(), error = %e, "Authentication rejected");
                self.failure(partial_success)?
            }
            Err(e) => return Err(e),
        };
        out.push(reply);
        Ok(out)
    }

    fn apply(&mut self, decision: AuthDecision, user: &str, method: String) -> CsshResult<Message> {
        match decision {
            AuthDecision::Accept => {
                info!(user, method = %method, "Authentication succeeded");
                self.succeeded.push(method);
                self.authenticated_user = Some(user.to_string());
                Ok(Message::UserauthSuccess)
            }
            AuthDecision::PasswordChangeRequired { prompt } => Ok(
                Message::UserauthPasswdChangereq(AuthPasswdChangeReq::new(prompt)),
            ),
            AuthDecision::Reject { .. } => Err(CsshError::AuthenticationRejected(format!(
                "{} for user {}",
                method, user
            ))),
        }
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("authenticated_user", &self.authenticated_user)
            .field("failures", &self.failures)
            .finish()
    }
}
