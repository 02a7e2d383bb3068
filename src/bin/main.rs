//! Offline walkthrough of one bill, no network required.

use splitlah::{
    ingestion::FixtureExtractor,
    media::MediaPayload,
    money::format_amount,
    state::BillSession,
    summary::{render_share_message, Summary},
    voice::FixtureInterpreter,
};
use tracing::info;

const SAMPLE_RECEIPT: &str = r#"{
    "merchantName": "Tiong Bahru Bakery",
    "date": "2024-05-01",
    "items": [
        { "name": "Flat White", "price": 10.0 },
        { "name": "Kouign Amann", "price": 6.0 }
    ],
    "subtotal": 16.0,
    "serviceCharge": 1.6,
    "gst": 1.44,
    "total": 19.04
}"#;

/// "Bob didn't drink the coffee"
const SAMPLE_VOICE: &str = r#"{"updates":[{"itemId":"item-0","assignedTo":["p2"]}]}"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("Splitlah walkthrough starting");

    let mut session = BillSession::new();
    let extractor = FixtureExtractor::new(SAMPLE_RECEIPT);
    let interpreter = FixtureInterpreter::new(SAMPLE_VOICE);

    session
        .submit_image(MediaPayload::from_bytes("image/jpeg", b"sample"), &extractor)
        .await?;

    session.toggle_assignment("item-0", "p2")?;
    session.toggle_assignment("item-0", "p3")?;
    session.toggle_assignment("item-1", "p2")?;

    let before = session.allocation()?;
    println!("\n=== BEFORE VOICE COMMAND ===");
    for share in &before.shares {
        println!("  {}: {}", share.name, format_amount(&share.total_owed));
    }

    session
        .process_voice_command(MediaPayload::from_bytes("audio/wav", b"RIFF"), &interpreter)
        .await?;
    session.set_mobile_number("p1", "91234567")?;
    session.finalize()?;

    let summary = Summary::from_session(&session)?;
    println!("\n=== SUMMARY ===");
    for share in &summary.allocation.shares {
        println!(
            "  {}: food {} + service {} + GST {} = {}",
            share.name,
            format_amount(&share.subtotal_share),
            format_amount(&share.service_charge_share),
            format_amount(&share.gst_share),
            format_amount(&share.total_owed),
        );
    }

    println!("\n=== SHARE MESSAGE ===");
    println!("{}", render_share_message(&summary, &session));

    Ok(())
}
