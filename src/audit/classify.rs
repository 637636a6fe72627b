//! Best-effort classification of a finished request
//!
//! The heuristics look at the path, method and status only. They are a
//! default: route overrides and handler annotations take precedence.

use axum::http::{Method, StatusCode};

use super::models::{AuditEventType, AuditResult, Resource, Severity};

const LOGIN_MARKERS: &[&str] = &["login", "signin", "sign-in", "authenticate"];
const LOGOUT_MARKERS: &[&str] = &["logout", "signout", "sign-out"];

/// Infer the event type from path, method and status
pub fn classify_event(method: &Method, path: &str, status: StatusCode) -> AuditEventType {
    let lowered = path.to_ascii_lowercase();
    let segments: Vec<&str> = lowered.split('/').filter(|s| !s.is_empty()).collect();
    let has_marker = |markers: &[&str]| segments.iter().any(|s| markers.contains(s));

    if has_marker(LOGOUT_MARKERS) {
        return AuditEventType::Logout;
    }
    if has_marker(LOGIN_MARKERS) {
        return if status.is_success() {
            AuditEventType::LoginSuccess
        } else {
            AuditEventType::LoginFailure
        };
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return AuditEventType::RateLimitExceeded;
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return AuditEventType::AccessDenied;
    }

    match *method {
        Method::GET | Method::HEAD => AuditEventType::DataRead,
        Method::POST => AuditEventType::DataCreated,
        Method::PUT | Method::PATCH => AuditEventType::DataUpdated,
        Method::DELETE => AuditEventType::DataDeleted,
        _ => AuditEventType::ApiRequest,
    }
}

/// `>= 500` error, `4xx` warning, otherwise info
pub fn severity_for(status: StatusCode) -> Severity {
    if status.is_server_error() {
        Severity::Error
    } else if status.is_client_error() {
        Severity::Warning
    } else {
        Severity::Info
    }
}

pub fn result_for(status: StatusCode) -> AuditResult {
    if status.is_client_error() || status.is_server_error() {
        AuditResult::Failure
    } else {
        AuditResult::Success
    }
}

/// `/api/v1/orders/42/items` -> type `orders`, id `42`
///
/// The leading `api` prefix and version segments are skipped.
pub fn infer_resource(path: &str) -> Option<Resource> {
    let mut segments = path
        .split('/')
        .filter(|s| !s.is_empty())
        .skip_while(|s| s.eq_ignore_ascii_case("api") || is_version(s));

    let resource_type = segments.next()?;
    let mut resource = Resource::new(resource_type);
    if let Some(id) = segments.next() {
        resource = resource.with_id(id);
    }
    Some(resource)
}

fn is_version(segment: &str) -> bool {
    let mut chars = segment.chars();
    matches!(chars.next(), Some('v') | Some('V'))
        && segment.len() > 1
        && chars.all(|c| c.is_ascii_digit())
}
