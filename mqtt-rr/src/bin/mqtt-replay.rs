use clap::Parser;
use miette::Result;
use mqtt_rr::recording::ReplaySession;
use mqtt_rr::{init_logging, ReplayCli, VERSION};
use mqtt_rr_core::PlaybackState;

#[tokio::main]
async fn main() -> Result<()> {
    let args = ReplayCli::parse();
    init_logging(&args.verbose);

    println!("MQTT Replay {}", VERSION);
    println!("  Broker:  {}", args.broker);
    println!("  Input:   {}", args.input.display());
    if args.end > 0 {
        println!("  Range:   {} s .. {} s", args.start, args.end);
    } else if args.start > 0 {
        println!("  Range:   {} s .. end", args.start);
    }
    println!("Press Ctrl-C to halt playback");

    let session = ReplaySession::start(&args).await?;
    if session.run().await? == PlaybackState::Aborted {
        std::process::exit(0);
    }
    Ok(())
}
