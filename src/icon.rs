use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use image::io::Reader as ImageReader;
use image::{DynamicImage, ImageError, ImageFormat};
use log::{debug, warn};
use tempfile::NamedTempFile;

use crate::error::{Result, StoreError};
use crate::profiles::ProfileChanges;

const ICON_EXTENSION: &str = "bmp";
const FALLBACK_NAME: &str = "icon";

/// What the front end can show for an icon binding.
#[derive(Debug)]
pub enum Preview {
    Empty,
    Missing,
    Invalid,
    Loaded(DynamicImage),
}

/// File stem for a new icon derived from a profile name.
///
/// Keeps letters, digits, `_`, `-` and whitespace; whitespace runs become a
/// single underscore.
pub fn safe_name(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '_' || *c == '-')
        .collect();
    let joined = kept.split_whitespace().collect::<Vec<_>>().join("_");
    if joined.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        joined
    }
}

/// Where an imported icon goes: next to the current binding when there is
/// one, otherwise in the cache directory under the profile's name.
pub fn icon_target(name: &str, existing: &str, cache_dir: &Path) -> std::io::Result<PathBuf> {
    let existing = existing.trim();
    if !existing.is_empty() {
        return Ok(absolute(Path::new(existing))?.with_extension(ICON_EXTENSION));
    }

    Ok(absolute(cache_dir)?.join(format!("{}.{ICON_EXTENSION}", safe_name(name))))
}

/// Bound paths are stored absolute.
fn absolute(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Decode an image, picking the format from its contents rather than its
/// extension.
fn decode_image(path: &Path) -> std::result::Result<DynamicImage, ImageError> {
    ImageReader::open(path)?.with_guessed_format()?.decode()
}

/// Decode `source`, re-encode it as a bitmap and write it where the profile's
/// icon belongs. Returns the path to bind.
///
/// An existing bound file with another extension is left in place.
pub fn import_icon(source: &Path, name: &str, existing: &str, cache_dir: &Path) -> Result<PathBuf> {
    let image = decode_image(source).map_err(|e| StoreError::UnreadableImage {
        path: source.to_path_buf(),
        source: e,
    })?;

    let write_failed = |path: &Path, e: ImageError| StoreError::ImageWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };
    let target =
        icon_target(name, existing, cache_dir).map_err(|e| write_failed(cache_dir, e.into()))?;
    write_bitmap(&image, &target).map_err(|e| write_failed(&target, e))?;

    debug!("wrote icon {} from {}", target.display(), source.display());
    Ok(target)
}

fn write_bitmap(image: &DynamicImage, target: &Path) -> std::result::Result<(), ImageError> {
    let converted = if image.color().has_alpha() {
        DynamicImage::ImageRgba8(image.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(image.to_rgb8())
    };

    let mut encoded = Vec::new();
    converted.write_to(&mut Cursor::new(&mut encoded), ImageFormat::Bmp)?;

    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(&encoded)?;
    file.persist(target).map_err(|e| e.error)?;
    Ok(())
}

/// Changes that unbind a profile's icon without touching the file.
pub fn clear_icon() -> ProfileChanges {
    ProfileChanges {
        poster_path: Some(String::new()),
        ..Default::default()
    }
}

pub fn resolve_preview(path: &str) -> Preview {
    let path = path.trim();
    if path.is_empty() {
        return Preview::Empty;
    }
    if !Path::new(path).is_file() {
        return Preview::Missing;
    }
    match decode_image(Path::new(path)) {
        Ok(image) => Preview::Loaded(image),
        Err(e) => {
            warn!("failed to load image '{path}': {e}");
            Preview::Invalid
        }
    }
}

#[cfg(test)]
mod tests {
    use image::{GenericImageView, RgbaImage};
    use tempfile::TempDir;

    use super::*;

    fn sample_png(dir: &Path, file: &str) -> PathBuf {
        let path = dir.join(file);
        let mut img = RgbaImage::new(3, 2);
        img.put_pixel(1, 1, image::Rgba([200, 10, 10, 128]));
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn test_safe_name() {
        assert_eq!(safe_name("My App!!"), "My_App");
        assert_eq!(safe_name("  spaced   out  "), "spaced_out");
        assert_eq!(safe_name("under_score-dash"), "under_score-dash");
        assert_eq!(safe_name("Café 2"), "Café_2");
        assert_eq!(safe_name("!!!"), "icon");
        assert_eq!(safe_name(""), "icon");
    }

    #[test]
    fn test_import_without_binding_writes_into_cache() {
        let dir = TempDir::new().unwrap();
        let source = sample_png(dir.path(), "source.png");
        let cache = dir.path().join("icon_cache");

        let bound = import_icon(&source, "My App!!", "", &cache).unwrap();

        assert_eq!(bound, cache.join("My_App.bmp"));
        let written = image::open(&bound).unwrap();
        assert_eq!(written.dimensions(), (3, 2));
        assert_eq!(
            ImageFormat::from_path(&bound).unwrap(),
            ImageFormat::Bmp
        );
    }

    #[test]
    fn test_import_with_binding_forces_bmp_extension() {
        let dir = TempDir::new().unwrap();
        let source = sample_png(dir.path(), "source.png");
        let old = sample_png(dir.path(), "old.png");
        let old_bytes = fs::read(&old).unwrap();

        let bound = import_icon(
            &source,
            "ignored",
            old.to_str().unwrap(),
            &dir.path().join("unused_cache"),
        )
        .unwrap();

        assert_eq!(bound, dir.path().join("old.bmp"));
        assert!(bound.is_file());
        assert_eq!(fs::read(&old).unwrap(), old_bytes);
        assert!(!dir.path().join("unused_cache").exists());
    }

    #[test]
    fn test_reimport_overwrites_bound_file() {
        let dir = TempDir::new().unwrap();
        let source = sample_png(dir.path(), "source.png");
        let cache = dir.path().join("cache");

        let first = import_icon(&source, "App", "", &cache).unwrap();
        let second = import_icon(&source, "App", first.to_str().unwrap(), &cache).unwrap();

        assert_eq!(first, second);
        assert_eq!(fs::read_dir(&cache).unwrap().count(), 1);
    }

    #[test]
    fn test_import_rejects_non_image() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("readme.txt");
        fs::write(&source, "not an image").unwrap();

        let err = import_icon(&source, "App", "", dir.path()).unwrap_err();
        assert!(matches!(err, StoreError::UnreadableImage { .. }));
    }

    #[test]
    fn test_import_into_unwritable_location_fails() {
        let dir = TempDir::new().unwrap();
        let source = sample_png(dir.path(), "source.png");
        let blocker = dir.path().join("file_not_dir");
        fs::write(&blocker, "x").unwrap();

        let err = import_icon(&source, "App", "", &blocker).unwrap_err();
        assert!(matches!(err, StoreError::ImageWriteFailed { .. }));
    }

    #[test]
    fn test_clear_icon_only_unbinds() {
        let changes = clear_icon();
        assert_eq!(changes.poster_path.as_deref(), Some(""));
        assert!(changes.name.is_none());
        assert!(changes.application_path.is_none());
    }

    #[test]
    fn test_resolve_preview_states() {
        let dir = TempDir::new().unwrap();
        let text = dir.path().join("note.txt");
        fs::write(&text, "hello").unwrap();
        let bitmap = import_icon(&sample_png(dir.path(), "s.png"), "bmp", "", dir.path()).unwrap();

        assert!(matches!(resolve_preview(""), Preview::Empty));
        assert!(matches!(resolve_preview("   "), Preview::Empty));
        assert!(matches!(resolve_preview("/nonexistent"), Preview::Missing));
        assert!(matches!(
            resolve_preview(text.to_str().unwrap()),
            Preview::Invalid
        ));
        match resolve_preview(bitmap.to_str().unwrap()) {
            Preview::Loaded(image) => assert_eq!(image.dimensions(), (3, 2)),
            other => panic!("expected loaded preview, got {other:?}"),
        }
    }

    #[test]
    fn test_resolve_preview_ignores_extension() {
        let dir = TempDir::new().unwrap();
        let bitmap = import_icon(&sample_png(dir.path(), "s.png"), "bmp", "", dir.path()).unwrap();
        let no_extension = dir.path().join("icon_noext");
        fs::copy(&bitmap, &no_extension).unwrap();
        let misnamed = dir.path().join("icon.png");
        fs::copy(&bitmap, &misnamed).unwrap();

        for path in [no_extension, misnamed] {
            match resolve_preview(path.to_str().unwrap()) {
                Preview::Loaded(image) => assert_eq!(image.dimensions(), (3, 2)),
                other => panic!("expected loaded preview for {}, got {other:?}", path.display()),
            }
        }
    }

    #[test]
    fn test_import_detects_format_from_contents() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("logo.jpg");
        RgbaImage::new(4, 4)
            .save_with_format(&source, ImageFormat::Png)
            .unwrap();
        let cache = dir.path().join("cache");

        let bound = import_icon(&source, "Logo", "", &cache).unwrap();

        assert_eq!(bound, cache.join("Logo.bmp"));
        assert_eq!(image::open(&bound).unwrap().dimensions(), (4, 4));
    }

    #[test]
    fn test_relative_binding_becomes_absolute() {
        let cwd = std::env::current_dir().unwrap();
        let target = icon_target("ignored", "icons/old.png", Path::new("/cache")).unwrap();
        assert_eq!(target, cwd.join("icons/old.bmp"));
        assert!(target.is_absolute());

        let cached = icon_target("App", "", Path::new("rel_cache")).unwrap();
        assert_eq!(cached, cwd.join("rel_cache").join("App.bmp"));
    }

    #[test]
    fn test_resolve_preview_directory_is_missing() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            resolve_preview(dir.path().to_str().unwrap()),
            Preview::Missing
        ));
    }
}
