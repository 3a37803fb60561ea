//! Stream management: `sideloader stream`.

use anyhow::Result;
use sideloader::errors::GateError;
use sideloader::release::{NewStream, ReleaseGate, ReleaseStore, Stream};

use super::super::StreamCommands;
use super::open_db;

fn print_policy(stream: &Stream) {
    if stream.require_signoff {
        println!(
            "  Sign-off: {} of {} address(es)",
            stream.required_signatures(),
            stream.email_list().len()
        );
    } else {
        println!("  No sign-off required");
    }
}

pub fn cmd_stream(project_dir: &std::path::Path, command: StreamCommands) -> Result<()> {
    let (_config, db) = open_db(project_dir)?;
    let gate = ReleaseGate::new();

    match command {
        StreamCommands::Add {
            name,
            require_signoff,
            signoff_list,
            quorum,
        } => {
            let stream = gate.create_stream(
                &db,
                &NewStream {
                    name,
                    require_signoff,
                    signoff_list,
                    quorum,
                },
            )?;
            println!("Created stream #{} ({})", stream.id, stream.name);
            print_policy(&stream);
        }
        StreamCommands::Edit {
            stream_id,
            name,
            require_signoff,
            signoff_list,
            quorum,
        } => {
            let current = db
                .get_stream(stream_id)?
                .ok_or(GateError::StreamNotFound { id: stream_id })?;
            let stream = gate.update_stream(
                &db,
                stream_id,
                &NewStream {
                    name: name.unwrap_or(current.name),
                    require_signoff: require_signoff.unwrap_or(current.require_signoff),
                    signoff_list: signoff_list.unwrap_or(current.signoff_list),
                    quorum: quorum.unwrap_or(current.quorum),
                },
            )?;
            println!("Updated stream #{} ({})", stream.id, stream.name);
            print_policy(&stream);
        }
        StreamCommands::Remove { stream_id } => {
            gate.delete_stream(&db, stream_id)?;
            println!("Removed stream #{} and its releases", stream_id);
        }
        StreamCommands::List => {
            let streams = db.list_streams()?;
            if streams.is_empty() {
                println!("No streams defined.");
            }
            for stream in streams {
                let policy = if stream.require_signoff {
                    format!("sign-off {}/{}", stream.required_signatures(), stream.email_list().len())
                } else {
                    "no sign-off".to_string()
                };
                println!("#{:<4} {:<24} {}", stream.id, stream.name, policy);
            }
        }
    }
    Ok(())
}
