//! Release inspection: `sideloader status`, `sideloader releases`.

use anyhow::Result;
use sideloader::release::{ReleaseGate, ReleaseSnapshot, ReleaseStore};

use super::open_db;

fn print_release(gate: &ReleaseGate, snapshot: &ReleaseSnapshot) {
    let release = &snapshot.release;
    println!(
        "#{:<5} build {:<6} {}  {}",
        release.id,
        release.build_id,
        release.release_date.format("%d-%m-%Y %H:%M"),
        gate.human_message(snapshot)
    );
}

pub fn cmd_status(project_dir: &std::path::Path, release_id: i64) -> Result<()> {
    let (config, db) = open_db(project_dir)?;
    let gate = ReleaseGate::new();
    let snapshot = gate.load(&db, release_id)?;
    let public_url = config.public_url();

    println!("Release #{} on stream {}", release_id, snapshot.stream.name);
    print_release(&gate, &snapshot);
    if snapshot.stream.require_signoff {
        println!(
            "Sign-offs: {} signed, {} remaining",
            snapshot.signoff_count(),
            snapshot.signoff_remaining().max(0)
        );
        for signoff in db.list_signoffs(release_id)? {
            let mark = if signoff.signed { "x" } else { " " };
            if signoff.signed || !snapshot.release.waiting {
                println!("  [{}] {}", mark, signoff.signature);
            } else {
                println!("  [{}] {}  {}", mark, signoff.signature, signoff.sign_url(&public_url));
            }
        }
    }
    Ok(())
}

pub fn cmd_releases(project_dir: &std::path::Path, stream_id: i64, limit: i64) -> Result<()> {
    let (_config, db) = open_db(project_dir)?;
    let gate = ReleaseGate::new();
    let stream = db
        .get_stream(stream_id)?
        .ok_or(sideloader::errors::GateError::StreamNotFound { id: stream_id })?;

    let releases = db.list_stream_releases(stream_id, limit.max(1))?;
    println!("Stream #{} ({}): {} release(s)", stream.id, stream.name, releases.len());
    for release in releases {
        let snapshot = gate.load(&db, release.id)?;
        print_release(&gate, &snapshot);
    }
    Ok(())
}
