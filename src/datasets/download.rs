use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use curl::easy::Easy;

use super::{
    errors::{Error, Result},
    progress::bytes_bar,
};

const USER_AGENT: &str = concat!("pbdl/", env!("CARGO_PKG_VERSION"));

fn easy(url: &str) -> Result<Easy> {
    let mut easy = Easy::new();
    easy.url(url)?;
    easy.follow_location(true)?;
    easy.useragent(USER_AGENT)?;
    Ok(easy)
}

fn check_status(easy: &mut Easy, url: &str) -> Result<()> {
    let status = easy.response_code()?;
    if status >= 400 {
        return Err(Error::HttpStatus {
            url: url.to_string(),
            status,
        });
    }
    Ok(())
}

/// Runs one transfer, handing each received chunk to `sink`.
fn transfer<F>(url: &str, show_progress: bool, mut sink: F) -> Result<()>
where
    F: FnMut(&[u8]) -> std::io::Result<()>,
{
    let mut easy = easy(url)?;
    easy.progress(show_progress)?;

    let pb = bytes_bar(show_progress, 1);
    pb.set_message(url.rsplit('/').next().unwrap_or(url).to_string());

    let mut sink_err = None;
    let performed = {
        let mut dl = easy.transfer();
        let bar = pb.clone();
        dl.progress_function(move |total_dl, cur_dl, _, _| {
            bar.set_length(total_dl as u64);
            bar.set_position(cur_dl as u64);
            true
        })?;
        dl.write_function(|data| match sink(data) {
            Ok(()) => Ok(data.len()),
            Err(e) => {
                sink_err = Some(e);
                // short write aborts the transfer
                Ok(0)
            }
        })?;
        dl.perform()
    };
    if let Some(e) = sink_err {
        return Err(e.into());
    }
    performed?;
    check_status(&mut easy, url)?;
    pb.finish_and_clear();
    Ok(())
}

/// Fetches `url` into memory.
pub(crate) fn fetch_bytes(url: &str, show_progress: bool) -> Result<Vec<u8>> {
    tracing::debug!("fetching {url}");
    let mut body = Vec::new();
    transfer(url, show_progress, |data| {
        body.extend_from_slice(data);
        Ok(())
    })?;
    Ok(body)
}

/// Streams `url` to `dest`. The body lands in `dest.part` first and is
/// renamed once complete, so `dest` never holds a partial download.
pub(crate) fn download_to_file<P: AsRef<Path>>(
    url: &str,
    dest: P,
    show_progress: bool,
) -> Result<()> {
    let dest = dest.as_ref();
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut part_name = dest.as_os_str().to_owned();
    part_name.push(".part");
    let part = std::path::PathBuf::from(part_name);

    tracing::info!("Downloading {url}");
    let result = (|| {
        let mut out = BufWriter::new(File::create(&part)?);
        transfer(url, show_progress, |data| out.write_all(data))?;
        out.flush()?;
        Ok::<_, Error>(())
    })();

    match result {
        Ok(()) => {
            std::fs::rename(&part, dest)?;
            tracing::info!("Wrote {}", dest.display());
            Ok(())
        }
        Err(e) => {
            let _ = std::fs::remove_file(&part);
            Err(e)
        }
    }
}
