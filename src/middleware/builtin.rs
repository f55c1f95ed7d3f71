//! Built-in middleware.
//!
//! | Key | Options | Behaviour |
//! |---|---|---|
//! | `logger` | none | logs the request line, stores it in `locals.requestLine` |
//! | `cors` | `origin`, `methods` | sets CORS headers; answers `OPTIONS` with 204 |
//! | `set-header` | `name`, `value` | sets a response header |
//! | `set-cookie` | `name`, `value`, `options` | appends a cookie |
//! | `set-local` | `key`, `value` | stores a value in locals |
//! | `delay` | `ms` | sleeps, then continues |
//! | `require-header` | `name`, `status`, `message` | answers with an error when the header is missing |
//! | `require-body` | `status` | answers 400 unless the body is a JSON object |
//! | `respond` | `status`, `body`, `text`, `headers` | answers the request |
//! | `fail` | `message` | fails its continuation |
//! | `reject` | `message` | resolves its future to an error |
//! | `panic` | `message` | panics while running |
//! | `hang` | `ms`, `mutate` | does nothing for `ms`; optionally scribbles on the response first |
//! | `late-write` | `ms`, `header`, `value` | continues, then writes after its window closed |

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use http::HeaderName;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::info;

use super::{Registry, parse_options};
use crate::error::Error;
use crate::guard::ScopedResponse;
use crate::handler::Next;
use crate::request::Request;
use crate::step::Step;

pub(crate) fn register_all(registry: Registry) -> Registry {
    registry
        .register("logger", "Log the request line and continue", logger)
        .register("cors", "Set CORS headers; answer preflight requests", cors)
        .register("set-header", "Set a response header and continue", set_header)
        .register("set-cookie", "Append a cookie and continue", set_cookie)
        .register("set-local", "Store a value in locals and continue", set_local)
        .register("delay", "Sleep for `ms` milliseconds, then continue", delay)
        .register("require-header", "Answer with an error unless a header is present", require_header)
        .register("require-body", "Answer 400 unless the body is a JSON object", require_body)
        .register("respond", "Answer the request with a status and body", respond)
        .register("fail", "Fail the continuation with a message", fail)
        .register("reject", "Resolve the handler to an error", reject)
        .register("panic", "Panic while handling the request", panic)
        .register("hang", "Never finish in time", hang)
        .register("late-write", "Continue, then write after the step has ended", late_write)
}

fn header_name(key: &str, name: &str) -> Result<String, Error> {
    HeaderName::from_bytes(name.as_bytes())
        .map(|h| h.as_str().to_owned())
        .map_err(|_| Error::InvalidOptions {
            key: key.to_owned(),
            reason: format!("`{name}` is not a valid header name"),
        })
}

fn status_code(key: &str, code: u16) -> Result<u16, Error> {
    if (100..=999).contains(&code) {
        Ok(code)
    } else {
        Err(Error::InvalidOptions { key: key.to_owned(), reason: format!("invalid status {code}") })
    }
}

// ── Pass-through ──────────────────────────────────────────────────────────────

pub fn logger(options: &Value) -> Result<Step, Error> {
    #[derive(Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Options {}
    let Options {} = parse_options("logger", options)?;

    Ok(Step::new("logger", |req: Arc<Request>, res: ScopedResponse, next: Next| async move {
        let line = format!("{} {}", req.method(), req.path());
        info!(method = %req.method(), path = req.path(), "request");
        res.set_local("requestLine", line);
        next.proceed();
    })
    .named("Logger"))
}

pub fn cors(options: &Value) -> Result<Step, Error> {
    #[derive(Deserialize)]
    #[serde(default, deny_unknown_fields)]
    struct Options {
        origin: String,
        methods: String,
    }
    impl Default for Options {
        fn default() -> Self {
            Self { origin: "*".to_owned(), methods: "GET,HEAD,PUT,PATCH,POST,DELETE".to_owned() }
        }
    }
    let opts: Options = parse_options("cors", options)?;
    let opts = Arc::new(opts);

    Ok(Step::new("cors", move |req: Arc<Request>, res: ScopedResponse, next: Next| {
        let opts = Arc::clone(&opts);
        async move {
            res.set_header("access-control-allow-origin", opts.origin.as_str());
            if req.method() == http::Method::OPTIONS {
                res.set_header("access-control-allow-methods", opts.methods.as_str())
                    .status(204)
                    .send("");
            } else {
                next.proceed();
            }
        }
    })
    .named("CORS"))
}

pub fn set_header(options: &Value) -> Result<Step, Error> {
    #[derive(Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Options {
        name: String,
        value: String,
    }
    let opts: Options = parse_options("set-header", options)?;
    let name = header_name("set-header", &opts.name)?;
    let value = opts.value;

    Ok(Step::new("set-header", move |_req, res: ScopedResponse, next: Next| {
        res.set_header(&name, value.as_str());
        async move { next.proceed() }
    })
    .named("Set header"))
}

pub fn set_cookie(options: &Value) -> Result<Step, Error> {
    #[derive(Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Options {
        name: String,
        value: String,
        #[serde(default)]
        options: Map<String, Value>,
    }
    let opts: Options = parse_options("set-cookie", options)?;
    if opts.name.is_empty() {
        return Err(Error::InvalidOptions {
            key: "set-cookie".to_owned(),
            reason: "cookie name must not be empty".to_owned(),
        });
    }

    Ok(Step::new("set-cookie", move |_req, res: ScopedResponse, next: Next| {
        res.cookie_with(&opts.name, opts.value.as_str(), opts.options.clone());
        async move { next.proceed() }
    })
    .named("Set cookie"))
}

pub fn set_local(options: &Value) -> Result<Step, Error> {
    #[derive(Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Options {
        key: String,
        #[serde(default)]
        value: Value,
    }
    let opts: Options = parse_options("set-local", options)?;

    Ok(Step::new("set-local", move |_req, res: ScopedResponse, next: Next| {
        res.set_local(&opts.key, opts.value.clone());
        async move { next.proceed() }
    })
    .named("Set local"))
}

pub fn delay(options: &Value) -> Result<Step, Error> {
    #[derive(Deserialize)]
    #[serde(default, deny_unknown_fields)]
    struct Options {
        ms: u64,
    }
    impl Default for Options {
        fn default() -> Self { Self { ms: 100 } }
    }
    let Options { ms } = parse_options("delay", options)?;

    Ok(Step::new("delay", move |_req, _res, next: Next| async move {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        next.proceed();
    })
    .named(format!("Delay {ms}ms")))
}

// ── Guards ────────────────────────────────────────────────────────────────────

pub fn require_header(options: &Value) -> Result<Step, Error> {
    #[derive(Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Options {
        name: String,
        #[serde(default = "unauthorized")]
        status: u16,
        message: Option<String>,
    }
    fn unauthorized() -> u16 { 401 }

    let opts: Options = parse_options("require-header", options)?;
    let name = header_name("require-header", &opts.name)?;
    let status = status_code("require-header", opts.status)?;
    let message = opts.message.unwrap_or_else(|| format!("missing header `{name}`"));

    Ok(Step::new("require-header", move |req: Arc<Request>, res: ScopedResponse, next: Next| {
        if req.header(&name).is_some() {
            next.proceed();
        } else {
            res.status(status).json(json!({ "error": message.as_str() }));
        }
        async {}
    })
    .named("Require header"))
}

pub fn require_body(options: &Value) -> Result<Step, Error> {
    #[derive(Deserialize)]
    #[serde(default, deny_unknown_fields)]
    struct Options {
        status: u16,
    }
    impl Default for Options {
        fn default() -> Self { Self { status: 400 } }
    }
    let opts: Options = parse_options("require-body", options)?;
    let status = status_code("require-body", opts.status)?;

    Ok(Step::new("require-body", move |req: Arc<Request>, res: ScopedResponse, next: Next| {
        if req.body().is_object() {
            next.proceed();
        } else {
            res.status(status).json(json!({ "error": "request body must be a JSON object" }));
        }
        async {}
    })
    .named("Require JSON body"))
}

// ── Terminal ──────────────────────────────────────────────────────────────────

pub fn respond(options: &Value) -> Result<Step, Error> {
    #[derive(Deserialize)]
    #[serde(default, deny_unknown_fields)]
    struct Options {
        status: u16,
        body: Value,
        text: Option<String>,
        headers: BTreeMap<String, String>,
    }
    impl Default for Options {
        fn default() -> Self {
            Self { status: 200, body: Value::Null, text: None, headers: BTreeMap::new() }
        }
    }
    let opts: Options = parse_options("respond", options)?;
    let status = status_code("respond", opts.status)?;
    let headers = opts.headers
        .into_iter()
        .map(|(k, v)| Ok((header_name("respond", &k)?, v)))
        .collect::<Result<Vec<_>, Error>>()?;
    let (body, text) = (opts.body, opts.text);

    Ok(Step::new("respond", move |_req, res: ScopedResponse, _next| {
        res.status(status);
        for (name, value) in &headers {
            res.set_header(name, value.as_str());
        }
        match &text {
            Some(text) => res.send(text.as_str()),
            None => res.json(body.clone()),
        };
        async {}
    })
    .named(format!("Respond {status}")))
}

pub fn fail(options: &Value) -> Result<Step, Error> {
    let opts: MessageOptions = parse_options("fail", options)?;
    let message = opts.message;

    Ok(Step::new("fail", move |_req, _res, next: Next| {
        next.fail(&message);
        async {}
    })
    .named("Fail"))
}

pub fn reject(options: &Value) -> Result<Step, Error> {
    let opts: MessageOptions = parse_options("reject", options)?;
    let message = opts.message;

    Ok(Step::new("reject", move |_req, _res, _next| {
        let message = message.clone();
        async move { Err::<(), _>(message) }
    })
    .named("Reject"))
}

pub fn panic(options: &Value) -> Result<Step, Error> {
    let opts: MessageOptions = parse_options("panic", options)?;
    let message = opts.message;

    Ok(Step::new("panic", move |_req, _res, _next| explode(message.clone())).named("Panic"))
}

// Output stays `()`: `IntoStepResult` has no impl for the never type.
async fn explode(message: String) {
    std::panic::panic_any(message)
}

#[derive(Deserialize)]
#[serde(default, deny_unknown_fields)]
struct MessageOptions {
    message: String,
}

impl Default for MessageOptions {
    fn default() -> Self {
        Self { message: "middleware failed".to_owned() }
    }
}

// ── Misbehaving ───────────────────────────────────────────────────────────────

pub fn hang(options: &Value) -> Result<Step, Error> {
    #[derive(Deserialize)]
    #[serde(default, deny_unknown_fields)]
    struct Options {
        ms: u64,
        mutate: bool,
    }
    impl Default for Options {
        fn default() -> Self { Self { ms: 60_000, mutate: false } }
    }
    let Options { ms, mutate } = parse_options("hang", options)?;

    Ok(Step::new("hang", move |_req, res: ScopedResponse, next: Next| async move {
        if mutate {
            res.status(500).set_header("x-hung", "true").set_local("hung", true);
        }
        tokio::time::sleep(Duration::from_millis(ms)).await;
        // Usually long after the deadline; the runner has moved on by now.
        next.proceed();
    })
    .named("Hang"))
}

pub fn late_write(options: &Value) -> Result<Step, Error> {
    #[derive(Deserialize)]
    #[serde(default, deny_unknown_fields)]
    struct Options {
        ms: u64,
        header: String,
        value: String,
    }
    impl Default for Options {
        fn default() -> Self {
            Self { ms: 50, header: "x-late-write".to_owned(), value: "1".to_owned() }
        }
    }
    let opts: Options = parse_options("late-write", options)?;
    let header = header_name("late-write", &opts.header)?;
    let (ms, value) = (opts.ms, opts.value);

    Ok(Step::new("late-write", move |_req, res: ScopedResponse, next: Next| {
        let (header, value) = (header.clone(), value.clone());
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            res.set_header(&header, value).set_local("lateWrite", true);
        });
        next.proceed();
        async {}
    })
    .named("Late write"))
}
