//! Behavior inherited from the generic Web API adapter.
//!
//! [`ODataDataService`](crate::ODataDataService) delegates connectivity
//! classification and change-request interception to a [`BaseDataService`].

use crate::entity::PendingChange;
use crate::error::ODataError;
use crate::request::ChangeRequest;

/// Message for failures that never reached the server.
pub const NO_CONNECTION_MESSAGE: &str = "HTTP response status 0 and no message. \
     Likely did not or could not reach server. Is the server running?";

/// Hook for rewriting change requests before they are batched.
pub trait ChangeRequestInterceptor: Send {
    /// Called once per change request, `index` being the position of the
    /// change in the caller's list.
    fn get_request(
        &mut self,
        request: ChangeRequest,
        change: &PendingChange,
        index: usize,
    ) -> ChangeRequest;

    /// Called once with every request that will be sent.
    fn done(&mut self, _requests: &[ChangeRequest]) {}
}

/// Leaves every request untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughInterceptor;

impl ChangeRequestInterceptor for PassthroughInterceptor {
    fn get_request(
        &mut self,
        request: ChangeRequest,
        _change: &PendingChange,
        _index: usize,
    ) -> ChangeRequest {
        request
    }
}

/// The base adapter the OData service delegates to.
pub trait BaseDataService: Send + Sync {
    /// Rewrite errors that indicate the server was never reached.
    fn catch_no_connection_error(&self, err: ODataError) -> ODataError;

    /// Interceptor for one save.
    fn create_change_request_interceptor(
        &self,
        changes: &[PendingChange],
    ) -> Box<dyn ChangeRequestInterceptor>;
}

/// Default base adapter.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebApiDataService;

impl BaseDataService for WebApiDataService {
    fn catch_no_connection_error(&self, mut err: ODataError) -> ODataError {
        if err.status.is_none() && err.message.trim().is_empty() {
            NO_CONNECTION_MESSAGE.clone_into(&mut err.message);
        }
        err
    }

    fn create_change_request_interceptor(
        &self,
        _changes: &[PendingChange],
    ) -> Box<dyn ChangeRequestInterceptor> {
        Box::new(PassthroughInterceptor)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::error::ODataErrorKind;
    use http::StatusCode;

    #[test]
    fn statusless_silent_errors_are_classified() {
        let base = WebApiDataService;
        let err = base.catch_no_connection_error(ODataError::new(ODataErrorKind::Transport, ""));
        assert_eq!(err.message, NO_CONNECTION_MESSAGE);
    }

    #[test]
    fn errors_with_status_or_message_are_untouched() {
        let base = WebApiDataService;

        let err = base.catch_no_connection_error(ODataError::new(
            ODataErrorKind::Transport,
            "Connection error: refused",
        ));
        assert_eq!(err.message, "Connection error: refused");

        let mut with_status = ODataError::protocol("");
        with_status.status = Some(StatusCode::INTERNAL_SERVER_ERROR);
        let err = base.catch_no_connection_error(with_status);
        assert!(err.message.is_empty());
    }
}
