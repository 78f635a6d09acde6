//! Inspect and initialize NVDIMM label-area images.
//!
//! ```text
//! labeltool format <image> [config-size]
//! labeltool dump <image>
//! ```

mod logger;

use kernel_nvdimm::{LabelArea, MemoryLabelArea, NvdimmError};
use kernel_nvdimm_label::{LabelAreaGeometry, LabelFormatError, NamespaceIndex};
use log::info;
use logger::StderrLogger;
use std::process::ExitCode;
use std::{env, fs, io};

const DEFAULT_CONFIG_SIZE: usize = 128 * 1024;

#[derive(Debug, thiserror::Error)]
enum ToolError {
    #[error("usage: labeltool <format|dump> <image> [config-size]")]
    Usage,
    #[error("invalid config size {0:?}")]
    ConfigSize(String),
    #[error("{path}: {source}")]
    File { path: String, source: io::Error },
    #[error(transparent)]
    Nvdimm(#[from] NvdimmError),
    #[error(transparent)]
    Format(#[from] LabelFormatError),
}

fn main() -> ExitCode {
    let _ = StderrLogger::from_env().init();
    let args: Vec<String> = env::args().skip(1).collect();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("labeltool: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &[String]) -> Result<(), ToolError> {
    match args {
        [cmd, image] if cmd == "format" => format(image, DEFAULT_CONFIG_SIZE),
        [cmd, image, size] if cmd == "format" => {
            let size = size
                .parse()
                .map_err(|_| ToolError::ConfigSize(size.clone()))?;
            format(image, size)
        }
        [cmd, image] if cmd == "dump" => dump(image),
        _ => Err(ToolError::Usage),
    }
}

fn read_image(path: &str) -> Result<Vec<u8>, ToolError> {
    fs::read(path).map_err(|source| ToolError::File {
        path: path.to_owned(),
        source,
    })
}

/// Write an empty index pair, creating a zeroed image if `path` is missing.
fn format(path: &str, config_size: usize) -> Result<(), ToolError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => vec![0; config_size],
        Err(source) => {
            return Err(ToolError::File {
                path: path.to_owned(),
                source,
            });
        }
    };
    let mut io = MemoryLabelArea::from_bytes(bytes);
    let mut area = LabelArea::probe(&io)?;
    area.format(&mut io)?;
    fs::write(path, io.as_bytes()).map_err(|source| ToolError::File {
        path: path.to_owned(),
        source,
    })?;
    info!("{path}: {} label slots", area.geometry().nslot());
    Ok(())
}

fn dump(path: &str) -> Result<(), ToolError> {
    let bytes = read_image(path)?;
    let geometry = LabelAreaGeometry::new(bytes.len() as u64)?;
    println!(
        "config size {:#x}, {} slots, index size {:#x}, labels at {:#x}",
        geometry.config_size(),
        geometry.nslot(),
        geometry.index_size(),
        geometry.label_offset()
    );

    for which in 0..2 {
        let start = usize::try_from(geometry.index_offset(which)).unwrap_or(usize::MAX);
        let len = usize::try_from(geometry.index_size()).unwrap_or(usize::MAX);
        let copy = bytes.get(start..start.saturating_add(len)).unwrap_or_default();
        match NamespaceIndex::parse(copy, &geometry, which) {
            Ok(index) => println!(
                "index {which}: sequence {}, {} free",
                index.sequence,
                index.free.count_free()
            ),
            Err(e) => println!("index {which}: invalid ({e})"),
        }
    }

    let io = MemoryLabelArea::from_bytes(bytes);
    let area = LabelArea::probe(&io)?;
    let Some(current) = area.current() else {
        println!("unformatted");
        return Ok(());
    };
    println!("current index {current}");
    for label in area.active_labels() {
        println!(
            "slot {:4}: {} {:?} {:?} nlabel {} position {} dpa {:#x} size {:#x} \
             cookie {:#x} lbasize {}",
            label.slot,
            label.uuid,
            label.name_str(),
            label.flags,
            label.nlabel,
            label.position,
            label.dpa,
            label.rawsize,
            label.isetcookie,
            label.lbasize
        );
    }
    Ok(())
}
