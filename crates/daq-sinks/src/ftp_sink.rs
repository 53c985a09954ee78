//! FTP/SFTP upload sink: wraps a [`CsvSink`] writing to a local staging
//! directory and periodically (or on close) pushes finished files to a
//! remote directory.

use std::io::Read;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use daq_types::{DaqResult, FtpProtocol, FtpRotation, FtpSinkSettings, Sample};
use ssh2::Session;
use suppaftp::FtpStream;
use tracing::{error, info};

use crate::{CsvSink, SampleSink};

/// Wraps a [`CsvSink`]; uploads are driven by `close()` (always) and, in
/// `periodic` mode, by elapsed wall time between `handle_sample` calls.
pub struct FtpSink {
    csv: CsvSink,
    settings: FtpSinkSettings,
    last_upload: Instant,
}

impl FtpSink {
    pub fn new(csv: CsvSink, settings: FtpSinkSettings) -> Self {
        Self {
            csv,
            settings,
            last_upload: Instant::now(),
        }
    }

    fn upload_pass(&mut self) {
        if let Err(err) = self.csv.flush() {
            error!(error = %err, "ftp sink failed to flush staged csv before upload");
        }
        let paths = self.csv.file_paths();
        for path in paths {
            if let Err(err) = upload_one(&self.settings, &path) {
                error!(path = %path.display(), error = %err, "ftp sink upload failed, continuing pass");
            }
        }
        self.last_upload = Instant::now();
    }
}

impl SampleSink for FtpSink {
    fn open(&mut self) -> DaqResult<()> {
        self.csv.open()
    }

    fn handle_sample(&mut self, sample: &Sample) -> DaqResult<()> {
        self.csv.handle_sample(sample)?;
        if self.settings.rotation == FtpRotation::Periodic {
            let interval = self.settings.upload_interval_s.unwrap_or(f64::INFINITY);
            if self.last_upload.elapsed() >= Duration::from_secs_f64(interval) {
                self.upload_pass();
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        self.upload_pass();
        self.csv.close();
    }
}

fn upload_one(settings: &FtpSinkSettings, local_path: &Path) -> anyhow::Result<()> {
    let file_name = local_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("local path has no file name: {}", local_path.display()))?;
    let remote_path = format!(
        "{}/{}",
        settings.remote_directory.trim_end_matches('/'),
        file_name
    );

    match settings.protocol {
        FtpProtocol::Ftp => upload_ftp(settings, local_path, &remote_path),
        FtpProtocol::Sftp => upload_sftp(settings, local_path, &remote_path),
    }
}

fn upload_ftp(settings: &FtpSinkSettings, local_path: &Path, remote_path: &str) -> anyhow::Result<()> {
    let mut ftp = FtpStream::connect(format!("{}:{}", settings.host, settings.port))?;
    ftp.login(&settings.username, &settings.password)?;
    ensure_remote_dirs_ftp(&mut ftp, &settings.remote_directory)?;

    let mut file = std::fs::File::open(local_path)?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)?;
    ftp.put_file(remote_path, &mut contents.as_slice())?;
    let _ = ftp.quit();
    info!(remote = %remote_path, "ftp sink uploaded file");
    Ok(())
}

fn ensure_remote_dirs_ftp(ftp: &mut FtpStream, directory: &str) -> anyhow::Result<()> {
    let mut path = String::new();
    for segment in directory.split('/').filter(|s| !s.is_empty()) {
        path.push('/');
        path.push_str(segment);
        let _ = ftp.mkdir(&path);
    }
    Ok(())
}

fn upload_sftp(settings: &FtpSinkSettings, local_path: &Path, remote_path: &str) -> anyhow::Result<()> {
    let tcp = TcpStream::connect(format!("{}:{}", settings.host, settings.port))?;
    let mut session = Session::new()?;
    session.set_tcp_stream(tcp);
    session.handshake()?;
    session.userauth_password(&settings.username, &settings.password)?;
    let sftp = session.sftp()?;

    ensure_remote_dirs_sftp(&sftp, &settings.remote_directory);

    let mut local_file = std::fs::File::open(local_path)?;
    let mut contents = Vec::new();
    local_file.read_to_end(&mut contents)?;
    let mut remote_file = sftp.create(Path::new(remote_path))?;
    std::io::Write::write_all(&mut remote_file, &contents)?;
    info!(remote = %remote_path, "sftp sink uploaded file");
    Ok(())
}

fn ensure_remote_dirs_sftp(sftp: &ssh2::Sftp, directory: &str) {
    let mut path = PathBuf::from("/");
    for segment in directory.split('/').filter(|s| !s.is_empty()) {
        path.push(segment);
        let _ = sftp.mkdir(&path, 0o755);
    }
}
