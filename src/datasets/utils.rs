use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::Path,
};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use indicatif::{ProgressBar, ProgressStyle};
use tar::Archive;
use zip::ZipArchive;

/// Streaming HTTP body that reports its progress on a bar.
pub struct RemoteFile {
    response: reqwest::blocking::Response,
    current_size: u64,
    pbar: Option<ProgressBar>,
}
impl RemoteFile {
    pub fn with_pbar(url: &str) -> Result<Self> {
        Self::with_config(url, 3600, true)
    }
    pub fn with_config(url: &str, timeout: u64, pbar: bool) -> Result<Self> {
        let client = reqwest::blocking::Client::new();
        let response = client
            .get(url)
            .timeout(std::time::Duration::from_secs(timeout))
            .send()?
            .error_for_status()
            .with_context(|| format!("failed to fetch {url}"))?;

        let pbar = if pbar {
            // servers may omit Content-Length; fall back to a spinner
            let pbar = match response.content_length() {
                Some(total_size) => {
                    let pbar = ProgressBar::new(total_size);
                    pbar.set_style(
                        ProgressStyle::default_bar()
                            .template(
                                "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] \
                                 {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
                            )?
                            .progress_chars("#>-"),
                    );
                    pbar
                }
                None => ProgressBar::new_spinner(),
            };
            pbar.set_message(format!("Downloading {}", url));
            Some(pbar)
        } else {
            None
        };
        Ok(Self {
            response,
            current_size: 0,
            pbar,
        })
    }
    fn update(&mut self, size: usize) {
        self.current_size += size as u64;
        if let Some(pbar) = &self.pbar {
            pbar.set_position(self.current_size);
        }
    }
}

impl Read for RemoteFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let size = self.response.read(buf)?;
        self.update(size);
        if size == 0 {
            if let Some(pbar) = &self.pbar {
                pbar.finish_and_clear();
            }
        }
        Ok(size)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressionFormat {
    Zip,
    Tgz,
    /// The payload is the dataset file itself.
    None,
}
impl CompressionFormat {
    pub fn from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        if path.ends_with(".zip") {
            Self::Zip
        } else if path.ends_with(".tar.gz") || path.ends_with(".tgz") {
            Self::Tgz
        } else {
            Self::None
        }
    }
}

/// Downloads `url` and unpacks it into the directory `path`. Uncompressed
/// payloads are written to `path/file_name`.
pub fn download_and_extract<P: AsRef<Path>>(
    url: &str,
    path: P,
    file_name: &str,
    format: CompressionFormat,
) -> Result<()> {
    let path = path.as_ref();
    extract(RemoteFile::with_pbar(url)?, path, file_name, format)?;
    if !path.join(file_name).exists() {
        log::warn!("{url} did not provide {file_name}");
    }
    Ok(())
}

/// Copies `reader` into an anonymous temporary file, rewound.
fn spool<R: Read>(reader: &mut R) -> Result<File> {
    let mut archive = tempfile::tempfile()?;
    std::io::copy(reader, &mut archive)?;
    archive.seek(SeekFrom::Start(0))?;
    Ok(archive)
}

/// Unpacks `reader` into the directory `path` according to `format`.
pub fn extract<R: Read, P: AsRef<Path>>(
    mut reader: R,
    path: P,
    file_name: &str,
    format: CompressionFormat,
) -> Result<()> {
    let path = path.as_ref();
    std::fs::create_dir_all(path)?;
    match format {
        CompressionFormat::None => {
            let mut local = File::create(path.join(file_name))?;
            std::io::copy(&mut reader, &mut local)?;
        }
        CompressionFormat::Zip => {
            let archive = spool(&mut reader)?;
            ZipArchive::new(&archive)?.extract(path)?;
        }
        CompressionFormat::Tgz => {
            let archive = spool(&mut reader)?;
            Archive::new(GzDecoder::new(&archive)).unpack(path)?;
        }
    }
    Ok(())
}
