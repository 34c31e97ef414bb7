use netx_probe::{logging, BoxError, Context, MeasurementConfig, MeasurementSession};

const USAGE: &str = "usage: netx-probe <hostname> [port] [config.json]";

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    logging::init();

    let mut args = std::env::args().skip(1);
    let hostname = args.next().ok_or(USAGE)?;
    let port = match args.next() {
        Some(raw) => raw.parse::<u16>()?,
        None => 443,
    };
    let config = match args.next() {
        Some(path) => MeasurementConfig::from_file(path)?,
        None => MeasurementConfig::default(),
    };

    let session = MeasurementSession::new(config)?;
    match session
        .measure_endpoints(&Context::background(), &hostname, port)
        .await
    {
        Ok(outcomes) => {
            for outcome in &outcomes {
                tracing::info!(
                    address = %outcome.address,
                    tls = ?outcome.tls.as_ref().map(|s| s.version.as_str()),
                    quic = ?outcome.quic.as_ref().map(|q| q.as_ref().map(|s| s.version.as_str())),
                    "endpoint"
                );
            }
        }
        Err(err) => {
            let code = netx_probe::classify_or_unknown(&*err);
            tracing::warn!(hostname, failure = %code, "resolution failed");
        }
    }

    println!("{}", session.saver().to_json()?);
    Ok(())
}
