//! Catalog download.
//!
//! The response body is streamed into `<name>.part` next to the destination
//! and renamed once complete, so an interrupted transfer never leaves a
//! truncated catalog behind.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

fn progress_bar(total: Option<u64>) -> Result<ProgressBar> {
    let pb = match total {
        Some(len) => {
            let pb = ProgressBar::new(len);
            pb.set_style(
                ProgressStyle::with_template(
                    "{spinner} [{elapsed_precise}] [{bar:40}] {bytes}/{total_bytes} ({eta})",
                )?
                .progress_chars("=> "),
            );
            pb
        }
        None => {
            let pb = ProgressBar::new_spinner();
            pb.set_style(ProgressStyle::with_template("{spinner} {bytes} ({bytes_per_sec})")?);
            pb
        }
    };
    Ok(pb)
}

/// Download `url` to `dest`, creating parent directories.
///
/// An existing `dest` is kept unless `force` is set. HTTP error statuses
/// are returned as errors; nothing is retried.
pub fn fetch_catalog(url: &str, dest: &Path, force: bool) -> Result<PathBuf> {
    if dest.exists() && !force {
        log::info!("Using cached catalog {}", dest.display());
        return Ok(dest.to_path_buf());
    }
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }

    log::info!("Downloading {url}");
    let part = partial_path(dest);
    let result = stream_to(url, &part);
    if result.is_err() {
        // Nothing useful survives a failed transfer.
        let _ = fs::remove_file(&part);
    }
    let bytes = result?;

    fs::rename(&part, dest)
        .with_context(|| format!("moving {} into place", part.display()))?;
    log::info!("Downloaded {bytes} bytes to {}", dest.display());
    Ok(dest.to_path_buf())
}

fn stream_to(url: &str, part: &Path) -> Result<u64> {
    let client = reqwest::blocking::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .timeout(None)
        .build()
        .context("building HTTP client")?;
    let response = client
        .get(url)
        .send()
        .with_context(|| format!("requesting {url}"))?
        .error_for_status()
        .with_context(|| format!("downloading {url}"))?;

    let pb = progress_bar(response.content_length())?;
    let file = File::create(part).with_context(|| format!("creating {}", part.display()))?;
    let mut writer = BufWriter::new(file);
    let bytes = io::copy(&mut pb.wrap_read(response), &mut writer)
        .with_context(|| format!("writing {}", part.display()))?;
    writer.flush()?;
    pb.finish_and_clear();
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;
    use std::thread;

    /// Serve one canned HTTP response on a local port.
    fn serve_once(status: &'static str, body: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap() > 0 {
                if line == "\r\n" {
                    break;
                }
                line.clear();
            }
            let head = format!(
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(head.as_bytes()).unwrap();
            stream.write_all(body).unwrap();
        });
        format!("http://{addr}/allStarLite.fits")
    }

    #[test]
    fn downloads_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("data").join("cat.fits");
        let url = serve_once("200 OK", b"SIMPLE  =                    T");

        let path = fetch_catalog(&url, &dest, false).unwrap();
        assert_eq!(path, dest);
        assert_eq!(fs::read(&dest).unwrap(), b"SIMPLE  =                    T");
        assert!(!partial_path(&dest).exists());
    }

    #[test]
    fn http_error_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("cat.fits");
        let url = serve_once("404 Not Found", b"");

        let err = fetch_catalog(&url, &dest, false).unwrap_err();
        assert!(format!("{err:#}").contains("404"));
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }

    #[test]
    fn cached_file_skips_network() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("cat.fits");
        fs::write(&dest, b"cached").unwrap();

        // Nothing listens here; reaching the network would fail.
        let path = fetch_catalog("http://127.0.0.1:9/none.fits", &dest, false).unwrap();
        assert_eq!(fs::read(path).unwrap(), b"cached");
    }
}
