//! The enrollment, recognition, and maintenance flows.
//!
//! Every flow takes its store handles and capability seams as arguments;
//! nothing here owns process-wide state. The camera handle lives in the
//! caller's scope, so it is released on every exit path when it drops.

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use rollcall_core::{
    crop_region, match_flags, resolve_name, DescriptorRecord, EngineError, FaceEngine, FaceRegion,
};
use rollcall_hw::{CameraError, Frame, FrameSource};
use rollcall_store::{AttendanceLog, DescriptorStore, MarkOutcome, Roster, StoreError};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::watch;

/// Frames to try before giving up on finding a usable (non-dark) one.
const GRAB_ATTEMPTS: usize = 10;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("camera: {0}")]
    Camera(#[from] CameraError),
    #[error("engine: {0}")]
    Engine(#[from] EngineError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("camera feed too dark to capture a usable frame")]
    DarkFeed,
    #[error("no student named {0}")]
    PersonNotFound(String),
}

/// What a recognition session accomplished.
pub struct AttendanceSummary {
    /// Names newly marked present, in the order they were marked.
    pub marked: Vec<String>,
}

/// Enroll one person from a single camera frame.
///
/// Grabs a usable frame, detects faces, and keeps the first detected
/// region only — one descriptor per enrollment action, even when several
/// faces are in the frame. On success the descriptor store and roster each
/// grow by exactly one record and the face crop lands in the dataset
/// directory; on `NoFaceDetected` nothing is written.
pub fn enroll<S: FrameSource, E: FaceEngine>(
    source: &mut S,
    engine: &mut E,
    store: &mut DescriptorStore,
    roster: &mut Roster,
    dataset_dir: &Path,
    name: &str,
) -> Result<(), FlowError> {
    let frame = grab_usable_frame(source)?;

    let regions = engine.detect(&frame.data, frame.width, frame.height)?;
    let Some(region) = regions.first() else {
        return Err(FlowError::NoFaceDetected);
    };
    if regions.len() > 1 {
        tracing::debug!(faces = regions.len(), "multiple faces in frame; keeping the first");
    }

    let descriptors = engine.describe(
        &frame.data,
        frame.width,
        frame.height,
        std::slice::from_ref(region),
    )?;
    let Some(descriptor) = descriptors.into_iter().next() else {
        return Err(FlowError::NoFaceDetected);
    };

    if store.contains(name) {
        // Name is identity: this appends another descriptor under the same person.
        tracing::warn!(name, "name already enrolled; adding another descriptor");
    }

    store.append(name, descriptor)?;
    roster.add(name, now_datetime())?;

    let person_dir = dataset_dir.join(name);
    let index = next_crop_index(&person_dir);
    if let Err(err) = save_crop(&frame, region, &person_dir, name, index) {
        tracing::warn!(error = %err, "could not save enrollment face crop");
    }

    tracing::info!(name, "enrolled");
    Ok(())
}

/// Run the recognition loop until the stop signal fires.
///
/// Per frame: detect every face, describe each, match against the stored
/// descriptors, and resolve a name by majority vote. A resolved name is
/// marked in the attendance log (at most once per day); a face matching no
/// stored descriptor is labeled unknown and writes nothing.
pub fn take_attendance<S: FrameSource, E: FaceEngine>(
    source: &mut S,
    engine: &mut E,
    store: &DescriptorStore,
    log: &mut AttendanceLog,
    threshold: f32,
    stop: &watch::Receiver<bool>,
) -> Result<AttendanceSummary, FlowError> {
    let mut marked = Vec::new();

    while !*stop.borrow() {
        let frame = source.grab()?;
        if frame.is_dark {
            continue;
        }

        let regions = engine.detect(&frame.data, frame.width, frame.height)?;
        if regions.is_empty() {
            continue;
        }

        let descriptors = engine.describe(&frame.data, frame.width, frame.height, &regions)?;
        for descriptor in &descriptors {
            let flags = match_flags(store.records(), descriptor, threshold);
            match resolve_name(store.records(), &flags) {
                Some(name) => {
                    let (date, time) = now_date_time();
                    match log.mark(&name, date, time)? {
                        MarkOutcome::Marked => {
                            tracing::info!(name = %name, %date, "attendance marked");
                            marked.push(name);
                        }
                        MarkOutcome::AlreadyMarked => {
                            tracing::debug!(name = %name, %date, "attendance already marked today");
                        }
                    }
                }
                None => tracing::debug!("face matched no enrolled descriptor: Unknown"),
            }
        }
    }

    tracing::info!(newly_marked = marked.len(), "recognition loop stopped");
    Ok(AttendanceSummary { marked })
}

/// Collect face crops for one person into the dataset directory.
///
/// Captures until `count` crops are saved or the stop signal fires. Crop
/// numbering continues after any existing files, so repeated sessions add
/// samples rather than overwrite them.
pub fn capture_samples<S: FrameSource, E: FaceEngine>(
    source: &mut S,
    engine: &mut E,
    dataset_dir: &Path,
    name: &str,
    count: usize,
    stop: &watch::Receiver<bool>,
) -> Result<usize, FlowError> {
    let person_dir = dataset_dir.join(name);
    let mut index = next_crop_index(&person_dir);
    let mut saved = 0usize;

    while saved < count && !*stop.borrow() {
        let frame = source.grab()?;
        if frame.is_dark {
            continue;
        }

        for region in engine.detect(&frame.data, frame.width, frame.height)? {
            save_crop(&frame, &region, &person_dir, name, index)?;
            index += 1;
            saved += 1;
            if saved >= count {
                break;
            }
        }
    }

    tracing::info!(name, saved, "capture session finished");
    Ok(saved)
}

/// Rebuild the descriptor store from the dataset directory.
///
/// Walks `dataset/<person>/`, runs detection and description on every image,
/// and replaces the store contents with one record per encoded face. People
/// and images are visited in sorted order so the rebuilt store is
/// deterministic.
pub fn rebuild_descriptors<E: FaceEngine>(
    engine: &mut E,
    dataset_dir: &Path,
    store: &mut DescriptorStore,
) -> Result<usize, FlowError> {
    if !dataset_dir.exists() {
        tracing::warn!(dir = %dataset_dir.display(), "dataset directory missing; store left untouched");
        return Ok(0);
    }

    let mut records = Vec::new();

    for person_dir in sorted_entries(dataset_dir)? {
        if !person_dir.is_dir() {
            continue;
        }
        let name = match person_dir.file_name() {
            Some(n) => n.to_string_lossy().into_owned(),
            None => continue,
        };

        for image_path in sorted_entries(&person_dir)? {
            let img = match image::open(&image_path) {
                Ok(img) => img.to_luma8(),
                Err(err) => {
                    tracing::warn!(path = %image_path.display(), error = %err, "skipping unreadable image");
                    continue;
                }
            };

            let (width, height) = img.dimensions();
            let data = img.into_raw();

            let regions = engine.detect(&data, width, height)?;
            let descriptors = engine.describe(&data, width, height, &regions)?;
            for descriptor in descriptors {
                records.push(DescriptorRecord {
                    name: name.clone(),
                    descriptor,
                });
            }
        }
    }

    let encoded = records.len();
    store.replace(records)?;
    tracing::info!(encoded, "descriptor store rebuilt from dataset");
    Ok(encoded)
}

/// Remove a person: every descriptor under the name plus the roster records.
///
/// Checked before any mutation so an unknown name fails without touching
/// either store.
pub fn remove_person(
    store: &mut DescriptorStore,
    roster: &mut Roster,
    name: &str,
) -> Result<(), FlowError> {
    if !store.contains(name) && !roster.contains(name) {
        return Err(FlowError::PersonNotFound(name.to_string()));
    }

    let descriptors = store.remove_all(name)?;
    let records = roster.remove(name)?;
    tracing::info!(name, descriptors, records, "removed person");
    Ok(())
}

/// Grab a frame, skipping dark ones, with a bounded number of attempts.
///
/// A feed that stays dark for every attempt (covered lens, unlit room) is
/// its own failure, distinct from a lit frame containing no face.
fn grab_usable_frame<S: FrameSource>(source: &mut S) -> Result<Frame, FlowError> {
    for _ in 0..GRAB_ATTEMPTS {
        let frame = source.grab()?;
        if !frame.is_dark {
            return Ok(frame);
        }
        tracing::debug!("skipping dark frame");
    }
    Err(FlowError::DarkFeed)
}

/// Save one face crop as `<person_dir>/<name>_<index>.png`.
///
/// A degenerate crop (region outside the frame) is skipped with a warning
/// rather than failing the flow.
fn save_crop(
    frame: &Frame,
    region: &FaceRegion,
    person_dir: &Path,
    name: &str,
    index: usize,
) -> Result<(), FlowError> {
    let (crop, width, height) = crop_region(&frame.data, frame.width, frame.height, region);
    if crop.is_empty() {
        tracing::warn!(name, "face region outside frame; crop not saved");
        return Ok(());
    }

    std::fs::create_dir_all(person_dir)?;
    let Some(img) = image::GrayImage::from_raw(width, height, crop) else {
        tracing::warn!(name, "crop buffer size mismatch; crop not saved");
        return Ok(());
    };
    img.save(person_dir.join(format!("{name}_{index}.png")))?;
    Ok(())
}

/// Next free crop number for a person directory (1-based).
///
/// One past the highest `<name>_<n>.png` number present, so a gap left by a
/// deleted crop is never refilled over a higher-numbered neighbor.
fn next_crop_index(person_dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(person_dir) else {
        return 1;
    };

    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| crop_number(&entry.file_name().to_string_lossy()))
        .max()
        .unwrap_or(0)
        + 1
}

/// Parse the trailing number out of a `<name>_<n>.<ext>` crop file name.
fn crop_number(file_name: &str) -> Option<usize> {
    let stem = file_name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(file_name);
    stem.rsplit_once('_').and_then(|(_, n)| n.parse().ok())
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    entries.sort();
    Ok(entries)
}

fn now_datetime() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

fn now_date_time() -> (NaiveDate, NaiveTime) {
    let now = Local::now();
    let time = now.time().with_nanosecond(0).unwrap_or_else(|| now.time());
    (now.date_naive(), time)
}
