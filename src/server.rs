use std::fs;
use std::path::{Path, PathBuf};

use tiny_http::{Header, Method, Response, Server};

use crate::prelude::*;

/// Minimal PEP 503 front end over the mirror tree: an anchor page per
/// package directory, digest fragments read from the `.hash` sidecars,
/// and metadata attributes for files with a `.metadata` sidecar (unless
/// that was turned off).
pub fn serve(index_path: &Path, host: &str, port: u16, no_metadata: bool) -> Result<()> {
    let server = Server::http((host, port))
        .map_err(|err| anyhow!("failed to bind {}:{}: {}", host, port, err))?;
    println!("Serving {} on http://{}:{}/", index_path.display(), host, port);

    for request in server.incoming_requests() {
        if request.method() != &Method::Get && request.method() != &Method::Head {
            let _ = request.respond(Response::from_string("method not allowed").with_status_code(405));
            continue;
        }
        let response = match route(index_path, request.url(), no_metadata) {
            Ok(Route::Html(page)) => Response::from_data(page.into_bytes())
                .with_header(header("Content-Type", "text/html; charset=utf-8")),
            Ok(Route::File(path)) => match fs::read(&path) {
                Ok(bytes) => Response::from_data(bytes)
                    .with_header(header("Content-Type", "application/octet-stream")),
                Err(err) => {
                    warn!("failed reading {}: {}", path.display(), err);
                    not_found()
                }
            },
            Err(err) => {
                debug!("rejecting {}: {:#}", request.url(), err);
                not_found()
            }
        };
        let _ = request.respond(response);
    }
    Ok(())
}

fn header(name: &str, value: &str) -> Header {
    // both strings are static and well-formed
    Header::from_bytes(name.as_bytes(), value.as_bytes()).unwrap()
}

fn not_found() -> Response<std::io::Cursor<Vec<u8>>> {
    Response::from_string("not found").with_status_code(404)
}

enum Route {
    Html(String),
    File(PathBuf),
}

fn route(index_path: &Path, url: &str, no_metadata: bool) -> Result<Route> {
    let path = url.split('?').next().unwrap_or("");
    let segments: Vec<&str> = path
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    for segment in &segments {
        // no traversal, no dotfiles
        if segment.contains("..") || segment.starts_with('.') || segment.contains('\\') {
            bail!("suspicious path segment {:?}", segment);
        }
    }
    match segments.as_slice() {
        [] => Ok(Route::Html(root_page(index_path)?)),
        [package] => Ok(Route::Html(package_page(index_path, package, no_metadata)?)),
        [package, filename] => {
            let file = index_path.join(package).join(filename);
            if !file.is_file() {
                bail!("no such file");
            }
            Ok(Route::File(file))
        }
        _ => bail!("unexpected path depth"),
    }
}

fn root_page(index_path: &Path) -> Result<String> {
    let mut names: Vec<String> = fs::read_dir(index_path)
        .with_context(|| format!("listing {}", index_path.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| !name.starts_with('.'))
        .collect();
    names.sort();

    let mut page = String::from("<!DOCTYPE html>\n<html><body>\n");
    for name in names {
        page.push_str(&format!("<a href=\"/{0}/\">{0}</a><br/>\n", name));
    }
    page.push_str("</body></html>\n");
    Ok(page)
}

fn package_page(index_path: &Path, package: &str, no_metadata: bool) -> Result<String> {
    let dir = index_path.join(package);
    let mut filenames: Vec<String> = fs::read_dir(&dir)
        .with_context(|| format!("no package directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| !name.ends_with(".hash") && !name.ends_with(".metadata"))
        .collect();
    filenames.sort();

    let mut page = String::from("<!DOCTYPE html>\n<html><body>\n");
    for filename in filenames {
        let mut href = format!("/{}/{}", package, filename);
        if let Ok(digest) = fs::read_to_string(dir.join(format!("{}.hash", filename))) {
            href.push('#');
            href.push_str(digest.trim());
        }
        let mut attributes = String::new();
        if !no_metadata && dir.join(format!("{}.metadata", filename)).is_file() {
            attributes.push_str(" data-dist-info-metadata=\"true\"");
        }
        page.push_str(&format!(
            "<a href=\"{}\"{}>{}</a><br/>\n",
            href, attributes, filename
        ));
    }
    page.push_str("</body></html>\n");
    Ok(page)
}

/// Install the serving program into the mirror root, so the whole tree
/// can be shipped into the restricted network as one directory.
pub fn install(index_path: &Path) -> Result<()> {
    println!("Copying server binary");
    let exe = std::env::current_exe().context("locating our own executable")?;
    let dest = index_path.join("depot");
    fs::copy(&exe, &dest)
        .with_context(|| format!("copying server binary to {}", dest.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&dest, fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}
