// MUSE Download Guard — Safe Image Acquisition
// Copyright (c) 2026 Xing_The_Creator | MUSE
//
// Every image URL is screened before fetch, and every downloaded file is
// validated before it reaches the selector.

use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};
use url::Url;

/// Allowed image extensions for downloaded content.
const SAFE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// URL path extensions that are never images.
const BLOCKED_EXTENSIONS: &[&str] = &[
    "exe", "bat", "cmd", "ps1", "msi", "scr", "vbs", "js", "hta", "dll", "sh",
];

/// Smaller files are truncated downloads or error pages.
const MIN_FILE_SIZE: u64 = 512;

/// Maximum sane image size (50 MB).
const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

pub struct DownloadGuard;

impl DownloadGuard {
    // -----------------------------------------------------------------------
    // URL Validation
    // -----------------------------------------------------------------------

    /// Validate a URL before downloading. Returns `Ok(())` if safe.
    pub fn validate_url(url: &str) -> Result<(), String> {
        let parsed = Url::parse(url).map_err(|e| format!("Invalid URL {}: {}", url, e))?;

        // 1. HTTPS only, plain HTTP allowed for loopback hosts
        let loopback = matches!(parsed.host_str(), Some("localhost") | Some("127.0.0.1"));
        match parsed.scheme() {
            "https" => {}
            "http" if loopback => {}
            scheme => {
                warn!("[GUARD] Blocked non-HTTPS URL: {}", url);
                return Err(format!("Unsafe protocol '{}' — only HTTPS allowed: {}", scheme, url));
            }
        }

        // 2. The path must not point at an executable
        let ext = Path::new(parsed.path())
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        if BLOCKED_EXTENSIONS.contains(&ext.as_str()) {
            warn!("[GUARD] Blocked executable URL '.{}': {}", ext, url);
            return Err(format!("URL points at a '.{}' file — not an image", ext));
        }

        debug!("[GUARD] URL passed safety check: {}", url);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Downloaded File Validation
    // -----------------------------------------------------------------------

    /// Validate a downloaded file on disk. Returns `Ok(())` if it is an image.
    pub fn validate_downloaded_file(path: &Path) -> Result<(), String> {
        // 1. File must exist
        if !path.exists() {
            return Err(format!("File does not exist: {:?}", path));
        }

        // 2. Extension check
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        if !SAFE_EXTENSIONS.contains(&ext.as_str()) {
            warn!("[GUARD] Blocked file extension '.{}': {:?}", ext, path);
            return Err(format!("Unsafe file extension '.{}' — only images allowed", ext));
        }

        // 3. File size bounds
        let size = fs::metadata(path)
            .map_err(|e| format!("Cannot read file metadata: {}", e))?
            .len();
        if size < MIN_FILE_SIZE {
            return Err(format!("File too small ({} bytes) — likely truncated", size));
        }
        if size > MAX_FILE_SIZE {
            return Err(format!("File too large ({} bytes) — exceeds 50 MB limit", size));
        }

        // 4. Magic bytes — executables out, known image formats in
        Self::check_magic_bytes(path)?;

        debug!(
            "[GUARD] File passed safety check: {:?} ({} bytes)",
            path.file_name().unwrap_or_default(),
            size
        );
        Ok(())
    }

    fn check_magic_bytes(path: &Path) -> Result<(), String> {
        let mut file = File::open(path)
            .map_err(|e| format!("Cannot open file for magic-byte check: {}", e))?;

        let mut header = [0u8; 16];
        let bytes_read = file
            .read(&mut header)
            .map_err(|e| format!("Cannot read file header: {}", e))?;
        let header = &header[..bytes_read];

        if header.starts_with(b"MZ") {
            warn!("[GUARD] PE executable detected: {:?}", path);
            return Err("File contains Windows executable (MZ header) — BLOCKED".to_string());
        }
        if header.starts_with(&[0x7F, b'E', b'L', b'F']) {
            warn!("[GUARD] ELF executable detected: {:?}", path);
            return Err("File contains Linux executable (ELF header) — BLOCKED".to_string());
        }
        if header.starts_with(b"#!") {
            warn!("[GUARD] Script shebang detected: {:?}", path);
            return Err("File contains script shebang (#!) — BLOCKED".to_string());
        }

        match image::guess_format(header) {
            Ok(image::ImageFormat::Jpeg | image::ImageFormat::Png | image::ImageFormat::WebP) => Ok(()),
            Ok(other) => Err(format!("Unexpected image format {:?}", other)),
            Err(_) => Err("File is not a recognised image".to_string()),
        }
    }

    // -----------------------------------------------------------------------
    // Filename Sanitization
    // -----------------------------------------------------------------------

    /// Strip path traversal and dangerous characters from filenames.
    pub fn sanitize_filename(name: &str) -> String {
        name.replace("..", "")
            .replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_")
            .replace('\0', "")
            .trim()
            .to_string()
    }
}
