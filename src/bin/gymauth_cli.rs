//!
//! gymauth CLI binary
//! ------------------
//! Interactive client for a gymauth server. Keeps its session in a local file so
//! a restarted CLI resumes signed in, and drops it as soon as the server refuses
//! the token.

use std::env;
use std::io::{self, Write};

use anyhow::{anyhow, Result};
use serde_json::Value;

use gymauth::cli::{
    render_table, FileSessionStorage, HttpMethod, HttpTransport, SessionError, SessionLifecycle, SessionState,
};
use gymauth::config::{has_flag, parse_string_arg};
use gymauth::identity::Role;

const DEFAULT_SERVER: &str = "http://127.0.0.1:7878";

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [--server <url>] [--session-file <path>]\n\nFlags:\n  --server <url>         Server base URL (env: GYMAUTH_SERVER, default {DEFAULT_SERVER})\n  --session-file <path>  Session file (env: GYMAUTH_SESSION_FILE, default .gymauth_session.json)\n  -h, --help             Show this help\n\nInteractive commands:\n  login <user> <password> [admin|member|user]   sign in, optionally to a specific portal\n  logout                                        sign out (server revokes the token)\n  status                                        show the local session state\n  get <path>                                    authenticated GET, e.g. get /user/details\n  post <path> [json]                            authenticated POST with an optional JSON body\n  delete <path>                                 authenticated DELETE\n  help                                          show this help\n  quit | exit                                   leave"
    );
}

type Session = SessionLifecycle<HttpTransport, FileSessionStorage>;

fn print_value(v: &Value) {
    match render_table(v) {
        Some(t) => println!("{}", t),
        None => println!("{}", serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string())),
    }
}

fn print_state(session: &Session) {
    match session.state() {
        SessionState::Anonymous => println!("status: anonymous"),
        SessionState::Authenticating => println!("status: authenticating"),
        SessionState::Failed { reason } => println!("status: failed ({})", reason),
        SessionState::Authenticated { principal, .. } => {
            println!("status: authenticated as {} ({}), id {}", principal.username, principal.role, principal.id)
        }
    }
}

async fn run_command(session: &Session, line: &str) -> Result<bool> {
    let mut parts = line.splitn(3, char::is_whitespace);
    let cmd = parts.next().unwrap_or("").to_ascii_lowercase();
    let arg1 = parts.next().map(str::trim).unwrap_or("");
    let rest = parts.next().map(str::trim).unwrap_or("");
    match cmd.as_str() {
        "" => {}
        "quit" | "exit" => return Ok(false),
        "help" => print_usage("gymauth_cli"),
        "status" | "whoami" => print_state(session),
        "login" => {
            let mut creds = rest.split_whitespace();
            let password = creds.next().ok_or_else(|| anyhow!("usage: login <user> <password> [role]"))?;
            let role = match creds.next() {
                Some(r) => Some(r.parse::<Role>().map_err(|e| anyhow!(e.message()))?),
                None => None,
            };
            let view = session.login(arg1, password, role).await?;
            println!("signed in; landing on {}", view);
        }
        "logout" => {
            session.logout().await?;
            println!("signed out");
        }
        "get" | "post" | "delete" => {
            if arg1.is_empty() { return Err(anyhow!("usage: {} <path>", cmd)); }
            let method: HttpMethod = cmd.parse().map_err(|e: String| anyhow!(e))?;
            let body = if rest.is_empty() { None } else { Some(serde_json::from_str::<Value>(rest)?) };
            let resp = session.request(method, arg1, body).await?;
            if !resp.is_success() { println!("HTTP {}", resp.status); }
            print_value(&resp.body);
        }
        other => println!("unknown command '{}'; type help", other),
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .try_init();

    let args: Vec<String> = env::args().collect();
    let program = args.first().cloned().unwrap_or_else(|| "gymauth_cli".to_string());
    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        print_usage(&program);
        return Ok(());
    }

    let server = parse_string_arg(&args, "--server")
        .or_else(|| env::var("GYMAUTH_SERVER").ok())
        .unwrap_or_else(|| DEFAULT_SERVER.to_string());
    let storage = match parse_string_arg(&args, "--session-file") {
        Some(p) => FileSessionStorage::new(p),
        None => FileSessionStorage::from_env(),
    };
    let transport = HttpTransport::new(&server)?;
    let session = SessionLifecycle::new(transport, storage);

    match session.restore().await {
        Ok(Some(view)) => println!("resumed saved session; landing on {}", view),
        Ok(None) => println!("not signed in; use: login <user> <password> [role]"),
        Err(e) => eprintln!("could not read saved session: {}", e),
    }

    let stdin = io::stdin();
    loop {
        print!("gymauth> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 { break; }
        match run_command(&session, line.trim()).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => match e.downcast_ref::<SessionError>() {
                Some(SessionError::SessionInvalidated(msg)) => println!("session ended by server: {}", msg),
                _ => println!("error: {}", e),
            },
        }
    }
    Ok(())
}
