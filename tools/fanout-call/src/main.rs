//
// Copyright 2026 Fanout contributors
//

//
// Sends one request through fanout and prints the decoded responses on
// stdout, one JSON value per line.
//
// With only -H the request goes to one of the hosts, or to all of them with
// -b. With -s the hosts are grouped into shards, and --keys selects the
// shards to query: one key behaves like the host case restricted to that
// shard's owners, several keys multicast to a smallest covering set of
// hosts.
//

use std::env;
use std::sync::Mutex;

use clap::{App, Arg, ArgMatches};
use serde_json::{json, Value};
use slog::{o, Drain, Level, LevelFilter, Logger};

use fanout::request::{Body, Content, Method};
use fanout::resources::{Resources, ResourcesOptions};
use fanout::shards::Shards;

const DEFAULT_LOG_LEVEL: Level = Level::Warning;
const LOG_LEVEL_ENV_VAR: &str = "FANOUT_LOG_LEVEL";

fn main() {
    let matches = App::new("fanout-call")
        .version("0.1.0")
        .about("Sends a request to a cluster of query nodes")
        .arg(
            Arg::with_name("host")
                .short("H")
                .long("host")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .help("Host address:port to send to (repeatable)"),
        )
        .arg(
            Arg::with_name("shard")
                .short("s")
                .long("shard")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .help("Shard owners as key=host,host,... (repeatable)"),
        )
        .arg(
            Arg::with_name("keys")
                .short("k")
                .long("keys")
                .takes_value(true)
                .help("Comma-separated shard keys to query"),
        )
        .arg(
            Arg::with_name("method")
                .short("m")
                .long("method")
                .takes_value(true)
                .default_value("GET")
                .help("HTTP method"),
        )
        .arg(
            Arg::with_name("broadcast")
                .short("b")
                .long("broadcast")
                .help("Send to every host instead of one"),
        )
        .arg(
            Arg::with_name("json")
                .short("d")
                .long("data")
                .takes_value(true)
                .conflicts_with("form")
                .help("JSON request body"),
        )
        .arg(
            Arg::with_name("form")
                .short("f")
                .long("form")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .help("Form field as name=value (repeatable)"),
        )
        .arg(
            Arg::with_name("timeout")
                .short("t")
                .long("timeout")
                .takes_value(true)
                .help("Read timeout in milliseconds"),
        )
        .arg(
            Arg::with_name("retries")
                .short("r")
                .long("retries")
                .takes_value(true)
                .help("Timeouts tolerated per host (default: 3)"),
        )
        .arg(
            Arg::with_name("log level")
                .short("l")
                .long("log-level")
                .takes_value(true)
                .help(
                    format!(
                        "Log level: trace|debug|info|warning|error|critical\n\
                         (uses {} env var if flag not given)\n\
                         (default: {})",
                        LOG_LEVEL_ENV_VAR,
                        format!("{:?}", DEFAULT_LOG_LEVEL).to_lowercase()
                    )
                    .as_str(),
                ),
        )
        .arg(
            Arg::with_name("path")
                .required(true)
                .help("Request path, including any query string"),
        )
        .get_matches();

    std::process::exit(match run(&matches) {
        Ok(_) => 0,
        Err(err) => {
            eprintln!("error: {}", err);
            1
        }
    });
}

fn run(matches: &ArgMatches) -> Result<(), String> {
    //
    // Try to get the log level from the CLI arg and, if that fails, the
    // environment variable. If both fail, just use the default.
    //
    let level = match matches.value_of("log level") {
        Some(level_str) => parse_log_level(level_str)?,
        None => match env::var(LOG_LEVEL_ENV_VAR) {
            Ok(level_str) => parse_log_level(&level_str)?,
            Err(_) => DEFAULT_LOG_LEVEL,
        },
    };
    let log = standard_log(level);

    let method: Method = matches
        .value_of("method")
        .unwrap_or("GET")
        .parse()
        .map_err(|e| format!("{}", e))?;
    let path = matches.value_of("path").unwrap_or("/");
    let body = parse_body(matches)?;

    let options = ResourcesOptions {
        read_timeout: parse_number(matches.value_of("timeout"), "timeout")?,
        max_timeout_retries: parse_number(matches.value_of("retries"), "retries")?,
        log: Some(log),
        ..Default::default()
    };
    let broadcast = matches.is_present("broadcast");

    if let Some(shards) = matches.values_of("shard") {
        let shards = shards
            .map(parse_shard)
            .collect::<Result<Vec<_>, _>>()?;
        let keys: Vec<String> = matches
            .value_of("keys")
            .ok_or("--keys is required with --shard")?
            .split(',')
            .map(String::from)
            .collect();
        let shards = Shards::new(shards, options);

        return match keys.as_slice() {
            [key] if broadcast => print_all(shards.broadcast(key, method, path, &body)),
            [key] => print_all(shards.unicast(key, method, path, &body).map(|c| vec![c])),
            _ => {
                let results = shards
                    .multicast(&keys, method, path, &body)
                    .map_err(|e| e.to_string())?;
                for (host, content) in results {
                    println!("{}", json!({ "host": host.as_str(), "response": value(content) }));
                }
                Ok(())
            }
        };
    }

    let hosts: Vec<&str> = matches
        .values_of("host")
        .ok_or("at least one --host or --shard is required")?
        .collect();
    let resources = Resources::new(hosts, options);
    if broadcast {
        print_all(resources.broadcast(method, path, &body))
    } else {
        print_all(resources.unicast(method, path, &body).map(|c| vec![c]))
    }
}

fn print_all(result: Result<Vec<Content>, fanout::Error>) -> Result<(), String> {
    for content in result.map_err(|e| e.to_string())? {
        println!("{}", value(content));
    }
    Ok(())
}

fn value(content: Content) -> Value {
    match content {
        Content::Json(value) => value,
        Content::Text(text) => Value::String(text),
    }
}

fn parse_body(matches: &ArgMatches) -> Result<Body, String> {
    if let Some(data) = matches.value_of("json") {
        let value: Value =
            serde_json::from_str(data).map_err(|e| format!("invalid --data: {}", e))?;
        return Ok(Body::Json(value));
    }
    match matches.values_of("form") {
        Some(fields) => {
            let fields = fields
                .map(|field| match field.split_once('=') {
                    Some((name, value)) => Ok((name, value)),
                    None => Err(format!("invalid --form field: {}", field)),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Body::form(fields))
        }
        None => Ok(Body::Empty),
    }
}

fn parse_shard(s: &str) -> Result<(String, Vec<String>), String> {
    let (key, hosts) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid --shard: {}", s))?;
    let hosts: Vec<String> = hosts
        .split(',')
        .filter(|h| !h.is_empty())
        .map(String::from)
        .collect();
    if hosts.is_empty() {
        return Err(format!("shard {} has no hosts", key));
    }
    Ok((key.to_string(), hosts))
}

fn parse_number<T>(s: Option<&str>, name: &str) -> Result<Option<T>, String>
where
    T: std::str::FromStr,
{
    s.map(|s| s.parse().map_err(|_| format!("invalid --{}: {}", name, s)))
        .transpose()
}

fn parse_log_level(s: &str) -> Result<Level, String> {
    match s.to_lowercase().as_str() {
        "trace" => Ok(Level::Trace),
        "debug" => Ok(Level::Debug),
        "info" => Ok(Level::Info),
        "warning" => Ok(Level::Warning),
        "error" => Ok(Level::Error),
        "critical" => Ok(Level::Critical),
        _ => Err(format!("invalid log level: {}", s)),
    }
}

fn standard_log(l: Level) -> Logger {
    let decorator = slog_term::PlainSyncDecorator::new(std::io::stderr());
    Logger::root(
        Mutex::new(LevelFilter::new(
            slog_term::FullFormat::new(decorator).build(),
            l,
        ))
        .fuse(),
        o!("build-id" => "0.1.0"),
    )
}
