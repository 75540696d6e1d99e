use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crate::core::error::{Error, Result};

use super::gate::{CancelToken, ResumeGate};
use super::transport::{TransferRequest, Transport};

pub const CHUNK_SIZE: usize = 8 * 1024;

/// Everything the transfer loop needs for one task.
pub struct TransferJob<'a> {
    pub url: &'a str,
    pub target: &'a Path,
    pub headers: &'a [(String, String)],
    pub gate: &'a ResumeGate,
    pub cancel: &'a CancelToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEvent {
    /// The server answered; `resumed_from` bytes were already on disk.
    Opened { resumed_from: u64, total: Option<u64> },
    Progress { downloaded: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub path: PathBuf,
    pub downloaded: u64,
    pub total: Option<u64>,
    pub resumed_from: u64,
}

/// Fetches `job.url` into `job.target`, resuming from an existing partial
/// file with a range request.
///
/// Each chunk is read, then the cancel token and resume gate are consulted
/// before it is written, so cancellation lands within one chunk and a pause
/// holds the loop without losing written bytes.
pub fn run_transfer<F>(transport: &dyn Transport, job: &TransferJob<'_>, mut on_event: F) -> Result<TransferOutcome>
where
    F: FnMut(TransferEvent),
{
    job.cancel.check()?;
    if let Some(parent) = job.target.parent() {
        fs::create_dir_all(parent)?;
    }
    let offset = existing_len(job.target)?;

    let response = transport.open(&TransferRequest {
        url: job.url,
        offset,
        headers: job.headers,
    })?;

    let (mut file, resumed_from, total) = match (response.status, response.range_start) {
        (206, Some(start)) if offset > 0 && start != offset && start != 0 => {
            return Err(Error::Transport(format!(
                "server answered from byte {start}, expected {offset}"
            )));
        }
        (206, start) if offset > 0 && start != Some(0) => {
            let total = response
                .range_total
                .or_else(|| response.content_length.map(|len| offset + len));
            let file = OpenOptions::new().append(true).open(job.target)?;
            tracing::info!("Resuming {} from byte {offset}", job.target.display());
            (file, offset, total)
        }
        (200 | 206, _) => {
            if offset > 0 {
                tracing::info!(
                    "Server did not resume {}; restarting from zero",
                    job.target.display()
                );
            }
            let total = response.range_total.or(response.content_length);
            (File::create(job.target)?, 0, total)
        }
        (status, _) => return Err(Error::Http { status }),
    };
    on_event(TransferEvent::Opened { resumed_from, total });

    let mut body = response.body;
    let mut downloaded = resumed_from;
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = match body.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(error) if error.kind() == ErrorKind::Interrupted => continue,
            Err(error) => return Err(error.into()),
        };
        job.cancel.check()?;
        job.gate.wait(job.cancel)?;
        file.write_all(&buffer[..read])?;
        downloaded += read as u64;
        on_event(TransferEvent::Progress { downloaded });
    }
    file.flush()?;

    if let Some(expected) = total {
        if downloaded < expected {
            return Err(Error::IncompleteTransfer {
                expected,
                received: downloaded,
            });
        }
    }

    Ok(TransferOutcome {
        path: job.target.to_path_buf(),
        downloaded,
        total,
        resumed_from,
    })
}

fn existing_len(path: &Path) -> Result<u64> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(meta.len()),
        Ok(_) => Ok(0),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(0),
        Err(error) => Err(error.into()),
    }
}
