//! `netkit fetch`: one request through a [`NetworkAgent`]

use crate::cli::FetchArgs;
use crate::errors::CliError;
use netkit_core::{
    NetworkAgent, NetworkConfig, Request, RequestDescriptor, RequestMethod, RequestSerializerType,
    RequestState, ResponseSerializerType,
};
use netkit_http::ReqwestTransport;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Request built from command-line flags
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    url: String,
    method: RequestMethod,
    headers: BTreeMap<String, String>,
    argument: Option<Value>,
    serializer: RequestSerializerType,
    response: ResponseSerializerType,
    timeout: Duration,
    cache_time: i64,
    cache_version: i64,
    sensitive: Option<String>,
}

impl FetchRequest {
    pub fn from_args(args: &FetchArgs) -> Result<Self, CliError> {
        if !(args.url.starts_with("http://") || args.url.starts_with("https://")) {
            return Err(CliError::invalid_argument(
                "url",
                format!("'{}' is not an absolute http(s) URL", args.url),
            ));
        }

        let method = RequestMethod::parse(&args.method).ok_or_else(|| {
            CliError::invalid_argument(
                "--method",
                format!("unsupported method '{}'", args.method),
            )
        })?;

        let headers = args
            .headers
            .iter()
            .map(|h| parse_header(h))
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        let argument = args.data.as_deref().map(parse_argument).transpose()?;

        Ok(Self {
            url: args.url.clone(),
            method,
            headers,
            argument,
            serializer: if args.json_body {
                RequestSerializerType::Json
            } else {
                RequestSerializerType::Http
            },
            response: if args.json {
                ResponseSerializerType::Json
            } else {
                ResponseSerializerType::Http
            },
            timeout: Duration::from_secs(args.timeout),
            cache_time: args.cache_time,
            cache_version: args.cache_version,
            sensitive: args.sensitive.clone(),
        })
    }
}

impl RequestDescriptor for FetchRequest {
    fn request_url(&self) -> String {
        self.url.clone()
    }

    fn request_method(&self) -> RequestMethod {
        self.method
    }

    fn request_serializer_type(&self) -> RequestSerializerType {
        self.serializer
    }

    fn response_serializer_type(&self) -> ResponseSerializerType {
        self.response
    }

    fn request_timeout_interval(&self) -> Duration {
        self.timeout
    }

    fn request_argument(&self) -> Option<Value> {
        self.argument.clone()
    }

    fn request_header_field_value_dictionary(&self) -> Option<BTreeMap<String, String>> {
        (!self.headers.is_empty()).then(|| self.headers.clone())
    }

    fn cache_time_in_seconds(&self) -> i64 {
        self.cache_time
    }

    fn cache_version(&self) -> i64 {
        self.cache_version
    }

    fn cache_sensitive_data(&self) -> Option<String> {
        self.sensitive.clone()
    }

    // The process exits right after the response is printed
    fn write_cache_asynchronously(&self) -> bool {
        false
    }
}

fn parse_header(raw: &str) -> Result<(String, String), CliError> {
    let Some((name, value)) = raw.split_once(':') else {
        return Err(CliError::invalid_argument(
            "--header",
            format!("'{raw}' is not in NAME:VALUE form"),
        ));
    };
    let name = name.trim();
    if name.is_empty() {
        return Err(CliError::invalid_argument(
            "--header",
            format!("'{raw}' has an empty name"),
        ));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn parse_argument(raw: &str) -> Result<Value, CliError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| CliError::invalid_argument("--data", format!("invalid JSON: {e}")))?;
    if !value.is_object() {
        return Err(CliError::invalid_argument(
            "--data",
            "the argument must be a JSON object",
        ));
    }
    Ok(value)
}

/// Execute `netkit fetch`
pub async fn execute(args: FetchArgs) -> Result<(), CliError> {
    let descriptor = FetchRequest::from_args(&args)?;

    let mut config = NetworkConfig::builder();
    if let Some(dir) = &args.cache_dir {
        config = config.cache_dir(dir);
    }
    if let Some(version) = &args.app_version {
        config = config.app_version(version);
    }

    let agent = NetworkAgent::builder()
        .transport(Arc::new(ReqwestTransport::new()?))
        .config(config.build())
        .build()?;
    debug!(cache_dir = %agent.cache().root().display(), "Agent ready");

    let request = agent.request(descriptor);
    request.set_ignore_cache(args.ignore_cache);
    request.start();
    let state = request.wait().await;
    info!(url = %args.url, %state, "Request finished");

    let mut stderr = io::stderr().lock();
    match state {
        RequestState::CompletedSuccess => {
            let origin = if request.is_data_from_cache() {
                "cache"
            } else {
                "network"
            };
            writeln!(stderr, "netkit: response served from {origin}")?;
            let mut stdout = io::stdout().lock();
            write_response(&mut stdout, &request, &args)?;
            stdout.flush()?;
            Ok(())
        }
        _ => Err(CliError::request_failed(
            args.url,
            request.response_status_code(),
            request.error().map(|e| e.to_string()),
        )),
    }
}

fn write_response(out: &mut impl Write, request: &Request, args: &FetchArgs) -> io::Result<()> {
    if args.include {
        let status = request.response_status_code().unwrap_or_default();
        writeln!(out, "HTTP {status}")?;
        for (name, value) in request.response_headers() {
            writeln!(out, "{name}: {value}")?;
        }
        writeln!(out)?;
    }

    if args.json {
        if let Some(json) = request.response_json() {
            let pretty = serde_json::to_string_pretty(&json).map_err(io::Error::other)?;
            writeln!(out, "{pretty}")?;
        }
    } else if let Some(body) = request.response_data() {
        out.write_all(&body)?;
    }
    Ok(())
}
