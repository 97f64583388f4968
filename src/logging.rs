use rocket::{
    fairing::{Fairing, Info, Kind},
    http::StatusClass,
    request::{FromRequest, Outcome},
    Data, Orbit, Request, Response, Rocket,
};
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::ballot::BallotEngine;

/// A unique identifier for a particular request.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct RequestId(pub usize);

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl RequestId {
    /// Atomically get the next ID. Wraps around to zero on overflow.
    pub fn next() -> RequestId {
        static REQUEST_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);
        RequestId(REQUEST_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Allow handlers to tag their own log lines with the request ID.
#[rocket::async_trait]
impl<'r> FromRequest<'r> for &'r RequestId {
    type Error = (); // No errors possible.

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        Outcome::Success(req.local_cache(RequestId::next))
    }
}

/// Logs every request and response, plus server start and stop.
#[derive(Debug, Copy, Clone)]
pub struct LoggerFairing;

#[rocket::async_trait]
impl Fairing for LoggerFairing {
    fn info(&self) -> Info {
        Info {
            name: "Logger",
            kind: Kind::Liftoff | Kind::Request | Kind::Response | Kind::Shutdown,
        }
    }

    async fn on_liftoff(&self, rocket: &Rocket<Orbit>) {
        let protocol = if rocket.config().tls_enabled() {
            "https"
        } else {
            "http"
        };
        let ip = &rocket.config().address;
        let port = &rocket.config().port;
        info!("Server launched on {protocol}://{ip}:{port}");
        if let Some(engine) = rocket.state::<BallotEngine>() {
            let policy = engine.policy();
            info!(
                "Ballots get {} attempts within {:?}",
                policy.max_attempts, policy.deadline
            );
        }
    }

    async fn on_request(&self, req: &mut Request<'_>, _data: &mut Data<'_>) {
        let id = req.local_cache(RequestId::next);
        let method = req.method();
        let uri = req.uri();
        info!("->req{id} {method} {uri}");
    }

    async fn on_response<'r>(&self, req: &'r Request<'_>, res: &mut Response<'r>) {
        let id = req.local_cache(RequestId::next);
        let code = res.status();
        let route = match req.route() {
            Some(r) => match r.name {
                Some(ref name) => format!("{name} ({})", r.uri),
                None => r.uri.to_string(),
            },
            None => "UNKNOWN ROUTE".to_string(),
        };
        // Contention is expected under load; anything else 5xx is not.
        let log_msg = format!("<-rsp{id} {code} {route}");
        match code.class() {
            StatusClass::ServerError if code.code == 503 => warn!("{log_msg}"),
            StatusClass::ServerError => error!("{log_msg}"),
            StatusClass::ClientError => warn!("{log_msg}"),
            _ => info!("{log_msg}"),
        }
    }

    async fn on_shutdown(&self, _rocket: &Rocket<Orbit>) {
        warn!("Shutdown requested, stopping gracefully...");
    }
}

#[cfg(test)]
mod tests {
    use log::{Level, LevelFilter, Record};
    use log4rs::{
        config::{load_config_file, Appender, Config},
        filter::{Filter, Response},
    };
    use log4rs_dynamic_filters::{default_deserializers, DynamicLevelFilter};

    use super::*;

    fn appender<'c>(config: &'c Config, name: &str) -> &'c Appender {
        config
            .appenders()
            .iter()
            .find(|appender| appender.name() == name)
            .unwrap()
    }

    /// Whether a line at `level` from `target` gets past the appender's filters.
    fn passes(appender: &Appender, level: Level, target: &str) -> bool {
        appender.filters().iter().all(|filter| {
            let response = filter.filter(
                &Record::builder()
                    .args(format_args!("line"))
                    .level(level)
                    .target(target)
                    .build(),
            );
            !matches!(response, Response::Reject)
        })
    }

    #[test]
    fn ids_increase() {
        let first = RequestId::next();
        let second = RequestId::next();
        assert!(second > first);
    }

    #[test]
    fn silencing_rocket_keeps_our_own_lines() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/log4rs.yaml");
        let config = load_config_file(path, default_deserializers()).unwrap();

        // Rocket writes only to its own console appender.
        let rocket = config
            .loggers()
            .iter()
            .find(|logger| logger.name() == "rocket")
            .unwrap();
        assert!(!rocket.additive());
        assert!(rocket.appenders().iter().any(|a| a == "rocket_stdout"));
        assert!(rocket.appenders().iter().all(|a| a != "stdout"));

        // Everything else goes through the unfiltered one.
        let root = config.root().appenders();
        assert!(root.iter().any(|a| a == "stdout"));
        assert!(root.iter().all(|a| a != "rocket_stdout"));
        for logger in config.loggers().iter().filter(|l| l.name() != "rocket") {
            assert!(logger.appenders().iter().all(|a| a != "rocket_stdout"));
        }

        DynamicLevelFilter::set("rocket", LevelFilter::Off);
        let rocket_stdout = appender(&config, "rocket_stdout");
        assert!(!passes(rocket_stdout, Level::Error, "rocket::server"));

        let stdout = appender(&config, "stdout");
        assert!(passes(stdout, Level::Info, "voter_api::logging"));
        assert!(passes(stdout, Level::Warn, "voter_api::ballot::engine"));
        assert!(passes(stdout, Level::Error, "voter_api::error"));
    }
}
