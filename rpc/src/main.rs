use clap::Parser;
use log::{error, info};
use rpc::{RpcClient, TransportConfig, Value};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Parser, Debug)]
#[command(author, version, about = "Call a method on a dedicated server over GBXRemote", long_about = None)]
struct Args {
    /// Server host name or IP address
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// XML-RPC port of the dedicated server
    #[arg(short, long, default_value = "5000")]
    port: u16,

    /// Login to authenticate with
    #[arg(short, long, default_value = "SuperAdmin")]
    login: String,

    /// Password for the login; authentication is skipped when empty
    #[arg(short = 'P', long, default_value = "")]
    password: String,

    /// Connect and I/O timeout in seconds
    #[arg(short, long, default_value = "20")]
    timeout: u64,

    /// After the call, listen for callbacks for this many seconds
    #[arg(long, default_value = "0")]
    listen: u64,

    /// Method to call
    #[arg(default_value = "GetVersion")]
    method: String,

    /// Method parameters: true/false, integers and decimals are typed,
    /// anything else is sent as a string
    params: Vec<String>,
}

fn parse_param(raw: &str) -> Value {
    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(int) = raw.parse::<i32>() {
        return Value::Int(int);
    }
    if raw.contains('.') {
        if let Ok(double) = raw.parse::<f64>() {
            if double.is_finite() {
                return Value::Double(double);
            }
        }
    }
    Value::from(raw)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let timeout = Duration::from_secs(args.timeout);
    let config = TransportConfig {
        connect_timeout: timeout,
        io_timeout: timeout,
        ..TransportConfig::default()
    };

    let address = format!("{}:{}", args.host, args.port);
    info!("Connecting to: {}", address);
    let mut client = RpcClient::connect(address.as_str(), config).await?;

    if !args.password.is_empty() {
        if !client.authenticate(&args.login, &args.password).await? {
            error!("Authentication as {} was refused", args.login);
            return Err("authentication refused".into());
        }
        info!("Authenticated as {}", args.login);
    }

    let params: Vec<Value> = args.params.iter().map(|p| parse_param(p)).collect();
    match client.call(&args.method, &params).await {
        Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
        Err(e) => {
            error!("{} failed: {}", args.method, e);
            client.close().await.ok();
            return Err(e.into());
        }
    }

    if args.listen > 0 {
        client.enable_callbacks(true).await?;
        info!("Listening for callbacks for {}s", args.listen);

        let deadline = Instant::now() + Duration::from_secs(args.listen);
        while Instant::now() < deadline {
            let wait = deadline.saturating_duration_since(Instant::now());
            for callback in client.wait_callbacks(wait).await? {
                println!("{}", serde_json::to_string(&callback)?);
            }
        }
    }

    client.close().await?;
    Ok(())
}
