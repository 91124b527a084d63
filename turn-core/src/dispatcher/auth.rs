//! Long-term credential challenge and validation
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use super::{ErrorKind, Processor, Response};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{debug, error, warn};
use turn_codec::{validate, Attribute, Credential, IntegrityKey, StunError, StunMessage, StunResult};

/// Identity established for one request
pub(crate) struct Authenticated {
    pub username: String,
    /// Key the response is signed with
    pub key: IntegrityKey,
}

impl Processor {
    /// Authenticate a request.
    ///
    /// The inner `Err` is the error response to send instead of handling the
    /// request; the outer error is an environmental fault.
    pub(super) async fn authenticate(
        &self,
        message: &StunMessage,
        addr: SocketAddr,
    ) -> StunResult<Result<Authenticated, Response>> {
        let now = Instant::now();
        if !message.has_integrity() {
            debug!(client = %addr, method = ?message.method, "Challenging unauthenticated request");
            return self.challenge(message, addr, ErrorKind::Unauthorized, now, false).map(Err);
        }

        let (username, realm, nonce) = match (message.username(), message.realm(), message.nonce()) {
            (Some(username), Some(realm), Some(nonce)) => (username, realm, nonce),
            _ => return self.reject(message, ErrorKind::BadRequest, Vec::new()).map(Err),
        };

        if realm != self.service.realm {
            warn!(client = %addr, realm = %realm, "Request for foreign realm");
            return self.challenge(message, addr, ErrorKind::Unauthorized, now, false).map(Err);
        }

        if !self.service.nonces.verify(&addr, nonce, now) {
            debug!(client = %addr, "Stale nonce");
            return self.challenge(message, addr, ErrorKind::StaleNonce, now, false).map(Err);
        }

        let password = match self.service.auth.lookup(addr, username).await {
            Some(password) => password,
            None => {
                warn!(client = %addr, username = %username, "Unknown user");
                return self
                    .challenge(message, addr, ErrorKind::Unauthorized, Instant::now(), true)
                    .map(Err);
            }
        };

        let credential = Credential::new(username, realm, password);
        match validate(message, &credential) {
            Ok(kind) => Ok(Ok(Authenticated {
                username: username.to_string(),
                key: credential.key(kind),
            })),
            Err(StunError::IntegrityFailed) | Err(StunError::NotIntegrity) => {
                warn!(client = %addr, username = %username, "Message integrity check failed");
                self.challenge(message, addr, ErrorKind::Unauthorized, Instant::now(), true)
                    .map(Err)
            }
            Err(StunError::InvalidInput) => {
                self.reject(message, ErrorKind::BadRequest, Vec::new()).map(Err)
            }
            Err(e) => {
                error!(client = %addr, error = %e, "Credential validation failed");
                Err(e)
            }
        }
    }

    /// Error response carrying REALM and a NONCE. `rotate` replaces the
    /// client's nonce after rejected credentials.
    fn challenge(
        &self,
        message: &StunMessage,
        addr: SocketAddr,
        kind: ErrorKind,
        now: Instant,
        rotate: bool,
    ) -> StunResult<Response> {
        let nonce = if rotate {
            self.service.nonces.issue(addr, now)
        } else {
            self.service.nonces.get_or_issue(addr, now)
        };
        self.reject(
            message,
            kind,
            vec![
                Attribute::Realm(self.service.realm.clone()),
                Attribute::Nonce(nonce),
            ],
        )
    }
}
