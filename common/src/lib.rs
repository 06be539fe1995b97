use std::net::IpAddr;

use axum::{Json, http::HeaderMap, response::IntoResponse};
use http::StatusCode;
use owo_colors::OwoColorize;

pub mod args;
pub mod postgres;
pub mod redis;
pub mod shutdown;

pub fn init() {
    let disable_colors = ["1", "true"].contains(
        &std::env::var("DISABLE_COLORS")
            .unwrap_or_else(|_| String::new())
            .to_lowercase()
            .as_str(),
    );
    owo_colors::set_override(!disable_colors);
}

pub mod response {
    use std::fmt::{Debug, Display};

    use anyhow::Error;
    use axum::response::Response;

    use super::*;

    pub fn print_error<T>(e: T)
    where
        T: Into<Error> + Display + Debug,
    {
        eprintln!(
            "❌ {}",
            format!("{:?}", e.into())
                .split("\n")
                .map(|s| s.red().to_string())
                .collect::<Vec<_>>()
                .join("\n"),
        );
    }

    pub fn err_resp<T>(e: T, code: StatusCode) -> Response
    where
        T: Into<Error> + Display + Debug,
    {
        let reason = format!("{}", e);
        print_error(e);
        (code, Json(serde_json::json!({"reason": reason}))).into_response()
    }

    pub fn not_found<T>(e: T) -> Response
    where
        T: Into<Error> + Display + Debug,
    {
        err_resp(e, StatusCode::NOT_FOUND)
    }

    pub fn conflict<T>(e: T) -> Response
    where
        T: Into<Error> + Display + Debug,
    {
        err_resp(e, StatusCode::CONFLICT)
    }

    pub fn internal_server_error<T>(e: T) -> Response
    where
        T: Into<Error> + Display + Debug,
    {
        err_resp(e, StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn bad_request<T>(e: T) -> Response
    where
        T: Into<Error> + Display + Debug,
    {
        err_resp(e, StatusCode::BAD_REQUEST)
    }

    pub fn forbidden<T>(e: T) -> Response
    where
        T: Into<Error> + Display + Debug,
    {
        err_resp(e, StatusCode::FORBIDDEN)
    }

    pub fn unauthorized<T>(e: T) -> Response
    where
        T: Into<Error> + Display + Debug,
    {
        err_resp(e, StatusCode::UNAUTHORIZED)
    }

    pub fn method_not_allowed<T>(e: T) -> Response
    where
        T: Into<Error> + Display + Debug,
    {
        err_resp(e, StatusCode::METHOD_NOT_ALLOWED)
    }

    pub fn service_unavailable<T>(e: T) -> Response
    where
        T: Into<Error> + Display + Debug,
    {
        err_resp(e, StatusCode::SERVICE_UNAVAILABLE)
    }
}

pub mod access_log {
    use super::*;

    pub async fn public(
        req: axum::extract::Request,
        next: axum::middleware::Next,
    ) -> axum::response::Response {
        request("PUBLIC", req, next, false).await
    }

    pub async fn admin(
        req: axum::extract::Request,
        next: axum::middleware::Next,
    ) -> axum::response::Response {
        request("ADMIN", req, next, false).await
    }

    pub async fn request(
        prefix: &str,
        req: axum::extract::Request,
        next: axum::middleware::Next,
        errors_only: bool,
    ) -> axum::response::Response {
        let ip = get_source_ip(req.headers())
            .map(|ip| ip.to_string())
            .unwrap_or("unknown".into());
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let start = std::time::Instant::now();
        let response = next.run(req).await;
        let duration = start.elapsed();
        let is_success = response.status().is_success();
        if is_success && errors_only {
            return response; // Skip non-error logs
        }
        let (a, b) = if is_success {
            ((20, 163, 73), (25, 163, 118))
        } else {
            ((230, 126, 16), (171, 85, 17))
        };
        println!(
            "🧾 {} {} {} {} {} {}{}{} {}{}",
            format!("[{}]", prefix).truecolor(a.0, a.1, a.2),
            method.truecolor(b.0, b.1, b.2),
            path.truecolor(b.0, b.1, b.2),
            "→".truecolor(a.0, a.1, a.2),
            response.status().truecolor(b.0, b.1, b.2),
            "(".truecolor(a.0, a.1, a.2),
            format!("{:?}", duration).truecolor(b.0, b.1, b.2),
            ")".truecolor(a.0, a.1, a.2),
            "xff=".magenta(),
            ip.magenta().dimmed(),
        );
        response
    }
}

pub fn get_source_ip(headers: &HeaderMap) -> Option<IpAddr> {
    // Prefer X-Forwarded-For (may contain multiple)
    if let Some(forwarded_for) = headers.get("x-forwarded-for")
        && let Ok(forwarded_for) = forwarded_for.to_str()
        && let Some(ip_str) = forwarded_for.split(',').next()
        && let Ok(ip) = ip_str.trim().parse()
    {
        return Some(ip);
    }

    // Fallback to X-Real-IP
    if let Some(real_ip) = headers.get("x-real-ip")
        && let Ok(ip_str) = real_ip.to_str()
        && let Ok(ip) = ip_str.trim().parse()
    {
        return Some(ip);
    }

    None
}
