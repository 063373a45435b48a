use chrono::Local;
use clap::Parser;
use miette::{IntoDiagnostic, Result};
use mqtt_rr::recording::{output_filename, RecordingSession};
use mqtt_rr::{init_logging, RecordCli, VERSION};
use std::path::PathBuf;
use std::time::Duration;
use tokio_graceful_shutdown::{SubsystemBuilder, Toplevel};

#[tokio::main]
async fn main() -> Result<()> {
    let args = RecordCli::parse();
    init_logging(&args.verbose);

    let path = PathBuf::from(output_filename(&args.output, &args.topic, &Local::now()));

    println!("MQTT Recorder {}", VERSION);
    println!("  Broker:  {}", args.broker);
    println!("  Topic:   {}", args.topic);
    println!("  Output:  {}", path.display());

    let session = RecordingSession::start(&args, path).await?;
    println!("Recording, press Ctrl-C to stop");

    Toplevel::new(move |s| async move {
        s.start(SubsystemBuilder::new("Recorder", move |subsys| {
            session.run(subsys)
        }));
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_secs(5))
    .await
    .into_diagnostic()
}
