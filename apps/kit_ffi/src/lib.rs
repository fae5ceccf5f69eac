//! Kit FFI - C ABI wrapper for Flutter/Dart FFI.
//!
//! Players are addressed by positive integer ids. Functions return `0` on success
//! and a negative `KIT_ERR_*` code on failure; the message of the last failure on
//! the calling thread is available through `kit_last_error`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_uchar};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use kit_mpv::{MpvEngine, MpvOptions};
use kit_player::{
    AudioDevice, Media, NativeEngine, Playable, Player, PlayerConfiguration, PlayerError,
    PlayerEvent, PlaylistMode, ScreenshotFormat, TrackInfo,
};
use parking_lot::Mutex;

pub const KIT_OK: c_int = 0;
pub const KIT_ERR_NULL_POINTER: c_int = -1;
pub const KIT_ERR_INVALID_STRING: c_int = -2;
pub const KIT_ERR_INVALID_JSON: c_int = -3;
pub const KIT_ERR_UNKNOWN_PLAYER: c_int = -4;
pub const KIT_ERR_INVALID_ARGUMENT: c_int = -5;
pub const KIT_ERR_ENGINE: c_int = -6;
pub const KIT_ERR_DISPOSED: c_int = -7;
pub const KIT_ERR_UNINITIALIZED: c_int = -8;

#[derive(thiserror::Error, Debug)]
enum FfiError {
    #[error("null pointer")]
    NullPointer,

    #[error("string is not valid UTF-8")]
    InvalidString,

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no player with id {0}")]
    UnknownPlayer(i64),

    #[error("{0}")]
    Player(#[from] PlayerError),
}

impl FfiError {
    fn code(&self) -> c_int {
        match self {
            FfiError::NullPointer => KIT_ERR_NULL_POINTER,
            FfiError::InvalidString => KIT_ERR_INVALID_STRING,
            FfiError::Json(_) => KIT_ERR_INVALID_JSON,
            FfiError::UnknownPlayer(_) => KIT_ERR_UNKNOWN_PLAYER,
            FfiError::Player(PlayerError::InvalidArgument(_)) => KIT_ERR_INVALID_ARGUMENT,
            FfiError::Player(PlayerError::Engine { .. }) => KIT_ERR_ENGINE,
            FfiError::Player(PlayerError::Disposed) => KIT_ERR_DISPOSED,
            FfiError::Player(PlayerError::Uninitialized) => KIT_ERR_UNINITIALIZED,
        }
    }
}

thread_local! {
    static LAST_ERROR: RefCell<String> = const { RefCell::new(String::new()) };
}

struct Entry {
    player: Player,
    events: Receiver<PlayerEvent>,
}

fn players() -> &'static Mutex<HashMap<i64, Arc<Entry>>> {
    static PLAYERS: OnceLock<Mutex<HashMap<i64, Arc<Entry>>>> = OnceLock::new();
    PLAYERS.get_or_init(|| Mutex::new(HashMap::new()))
}

static NEXT_ID: AtomicI64 = AtomicI64::new(1);

fn register(player: Player) -> i64 {
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let events = player.stream().events();
    players().lock().insert(id, Arc::new(Entry { player, events }));
    id
}

fn lookup(id: i64) -> Result<Arc<Entry>, FfiError> {
    players()
        .lock()
        .get(&id)
        .cloned()
        .ok_or(FfiError::UnknownPlayer(id))
}

fn finish(result: Result<(), FfiError>) -> c_int {
    match result {
        Ok(()) => KIT_OK,
        Err(e) => {
            log::debug!("ffi call failed: {}", e);
            let code = e.code();
            LAST_ERROR.with(|last| *last.borrow_mut() = e.to_string());
            code
        }
    }
}

fn with_player(id: i64, f: impl FnOnce(&Player) -> Result<(), PlayerError>) -> c_int {
    finish(lookup(id).and_then(|entry| Ok(f(&entry.player)?)))
}

/// # Safety
/// `ptr` must be NULL or a valid NUL-terminated C string.
unsafe fn cstr<'a>(ptr: *const c_char) -> Result<&'a str, FfiError> {
    if ptr.is_null() {
        return Err(FfiError::NullPointer);
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| FfiError::InvalidString)
}

/// # Safety
/// `ptr` must be NULL or a valid NUL-terminated C string.
unsafe fn optional_json<T>(ptr: *const c_char) -> Result<T, FfiError>
where
    T: Default + serde::de::DeserializeOwned,
{
    if ptr.is_null() {
        return Ok(T::default());
    }
    let json = unsafe { cstr(ptr) }?;
    if json.trim().is_empty() {
        return Ok(T::default());
    }
    Ok(serde_json::from_str(json)?)
}

/// Hands `bytes` to the caller; release with `kit_free_bytes`.
///
/// # Safety
/// `out_ptr` and `out_len` must be valid writable pointers.
unsafe fn give_bytes(bytes: Vec<u8>, out_ptr: *mut *mut c_uchar, out_len: *mut usize) {
    let bytes = bytes.into_boxed_slice();
    let len = bytes.len();
    let ptr = Box::into_raw(bytes) as *mut c_uchar;
    unsafe {
        *out_ptr = ptr;
        *out_len = len;
    }
}

fn create(engine: Box<dyn NativeEngine>, config: PlayerConfiguration) -> Result<i64, FfiError> {
    let player = Player::new(engine, config)?;
    Ok(register(player))
}

/// Creates a player backed by an mpv process.
/// Returns the player id (> 0) or a negative error code.
/// `config_json` and `mpv_options_json` may be NULL to use defaults.
///
/// # Safety
/// Both arguments must be NULL or valid NUL-terminated C strings.
#[no_mangle]
pub unsafe extern "C" fn kit_player_create(
    config_json: *const c_char,
    mpv_options_json: *const c_char,
) -> i64 {
    let result = unsafe { optional_json::<PlayerConfiguration>(config_json) }.and_then(|config| {
        let options = unsafe { optional_json::<MpvOptions>(mpv_options_json) }?;
        create(Box::new(MpvEngine::new(options)), config)
    });
    match result {
        Ok(id) => id,
        Err(e) => i64::from(finish(Err(e))),
    }
}

/// Opens a `Playable` given as JSON (`{"type":"media",...}` or `{"type":"playlist",...}`).
///
/// # Safety
/// `playable_json` must be a valid NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn kit_player_open(id: i64, playable_json: *const c_char, play: bool) -> c_int {
    let playable = unsafe { cstr(playable_json) }
        .and_then(|json| Ok(serde_json::from_str::<Playable>(json)?));
    match playable {
        Ok(playable) => with_player(id, |p| p.open(playable, play)),
        Err(e) => finish(Err(e)),
    }
}

#[no_mangle]
pub extern "C" fn kit_player_play(id: i64) -> c_int {
    with_player(id, Player::play)
}

#[no_mangle]
pub extern "C" fn kit_player_pause(id: i64) -> c_int {
    with_player(id, Player::pause)
}

#[no_mangle]
pub extern "C" fn kit_player_play_or_pause(id: i64) -> c_int {
    with_player(id, Player::play_or_pause)
}

#[no_mangle]
pub extern "C" fn kit_player_stop(id: i64) -> c_int {
    with_player(id, Player::stop)
}

#[no_mangle]
pub extern "C" fn kit_player_seek(id: i64, position_ms: u64) -> c_int {
    with_player(id, |p| p.seek(Duration::from_millis(position_ms)))
}

#[no_mangle]
pub extern "C" fn kit_player_next(id: i64) -> c_int {
    with_player(id, Player::next)
}

#[no_mangle]
pub extern "C" fn kit_player_previous(id: i64) -> c_int {
    with_player(id, Player::previous)
}

#[no_mangle]
pub extern "C" fn kit_player_jump(id: i64, index: usize) -> c_int {
    with_player(id, |p| p.jump(index))
}

/// Appends a `Media` given as JSON.
///
/// # Safety
/// `media_json` must be a valid NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn kit_player_add(id: i64, media_json: *const c_char) -> c_int {
    let media = unsafe { cstr(media_json) }.and_then(|json| Ok(serde_json::from_str::<Media>(json)?));
    match media {
        Ok(media) => with_player(id, |p| p.add(media)),
        Err(e) => finish(Err(e)),
    }
}

#[no_mangle]
pub extern "C" fn kit_player_remove(id: i64, index: usize) -> c_int {
    with_player(id, |p| p.remove(index))
}

#[no_mangle]
pub extern "C" fn kit_player_move(id: i64, from: usize, to: usize) -> c_int {
    with_player(id, |p| p.move_media(from, to))
}

/// `mode` is one of `none`, `single`, `loop`, `loop-playlist`.
///
/// # Safety
/// `mode` must be a valid NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn kit_player_set_playlist_mode(id: i64, mode: *const c_char) -> c_int {
    let mode = unsafe { cstr(mode) }.and_then(|name| {
        PlaylistMode::parse(name).ok_or_else(|| {
            PlayerError::InvalidArgument(format!("unknown playlist mode {}", name)).into()
        })
    });
    match mode {
        Ok(mode) => with_player(id, |p| p.set_playlist_mode(mode)),
        Err(e) => finish(Err(e)),
    }
}

#[no_mangle]
pub extern "C" fn kit_player_set_shuffle(id: i64, shuffle: bool) -> c_int {
    with_player(id, |p| p.set_shuffle(shuffle))
}

#[no_mangle]
pub extern "C" fn kit_player_set_volume(id: i64, volume: f64) -> c_int {
    with_player(id, |p| p.set_volume(volume))
}

#[no_mangle]
pub extern "C" fn kit_player_set_rate(id: i64, rate: f64) -> c_int {
    with_player(id, |p| p.set_rate(rate))
}

#[no_mangle]
pub extern "C" fn kit_player_set_pitch(id: i64, pitch: f64) -> c_int {
    with_player(id, |p| p.set_pitch(pitch))
}

/// # Safety
/// `name` must be a valid NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn kit_player_set_audio_device(id: i64, name: *const c_char) -> c_int {
    match unsafe { cstr(name) } {
        Ok(name) => with_player(id, |p| p.set_audio_device(&AudioDevice::new(name, ""))),
        Err(e) => finish(Err(e)),
    }
}

/// # Safety
/// `track_id` must be a valid NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn kit_player_set_video_track(id: i64, track_id: *const c_char) -> c_int {
    match unsafe { cstr(track_id) } {
        Ok(track) => with_player(id, |p| p.set_video_track(&TrackInfo::new(track))),
        Err(e) => finish(Err(e)),
    }
}

/// # Safety
/// `track_id` must be a valid NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn kit_player_set_audio_track(id: i64, track_id: *const c_char) -> c_int {
    match unsafe { cstr(track_id) } {
        Ok(track) => with_player(id, |p| p.set_audio_track(&TrackInfo::new(track))),
        Err(e) => finish(Err(e)),
    }
}

/// # Safety
/// `track_id` must be a valid NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn kit_player_set_subtitle_track(id: i64, track_id: *const c_char) -> c_int {
    match unsafe { cstr(track_id) } {
        Ok(track) => with_player(id, |p| p.set_subtitle_track(&TrackInfo::new(track))),
        Err(e) => finish(Err(e)),
    }
}

/// Takes a screenshot. `format` is `jpeg`, `png` or `raw` (BGRA pixels).
/// Returns 0 and fills the out pointers on success, 1 when no frame is available yet.
/// Caller must call `kit_free_bytes` on the returned buffer.
///
/// # Safety
/// - `format` must be a valid NUL-terminated C string.
/// - All out pointers must be valid writable pointers.
#[no_mangle]
pub unsafe extern "C" fn kit_player_screenshot(
    id: i64,
    format: *const c_char,
    include_subtitles: bool,
    out_ptr: *mut *mut c_uchar,
    out_len: *mut usize,
    out_width: *mut u32,
    out_height: *mut u32,
) -> c_int {
    if out_ptr.is_null() || out_len.is_null() || out_width.is_null() || out_height.is_null() {
        return finish(Err(FfiError::NullPointer));
    }
    let format = unsafe { cstr(format) }.and_then(|name| {
        ScreenshotFormat::parse(name).ok_or_else(|| {
            PlayerError::InvalidArgument(format!("unknown screenshot format {}", name)).into()
        })
    });
    let shot = format.and_then(|format| {
        let entry = lookup(id)?;
        Ok(entry.player.screenshot(format, include_subtitles)?)
    });
    match shot {
        Ok(Some(shot)) => {
            unsafe {
                *out_width = shot.width;
                *out_height = shot.height;
                give_bytes(shot.bytes, out_ptr, out_len);
            }
            KIT_OK
        }
        Ok(None) => 1,
        Err(e) => finish(Err(e)),
    }
}

/// Writes the current state snapshot as UTF-8 JSON.
/// Caller must call `kit_free_bytes` on the returned buffer.
///
/// # Safety
/// `out_ptr` and `out_len` must be valid writable pointers.
#[no_mangle]
pub unsafe extern "C" fn kit_player_state_json(
    id: i64,
    out_ptr: *mut *mut c_uchar,
    out_len: *mut usize,
) -> c_int {
    if out_ptr.is_null() || out_len.is_null() {
        return finish(Err(FfiError::NullPointer));
    }
    let json = lookup(id).and_then(|entry| Ok(serde_json::to_vec(&*entry.player.state())?));
    match json {
        Ok(json) => {
            unsafe { give_bytes(json, out_ptr, out_len) };
            KIT_OK
        }
        Err(e) => finish(Err(e)),
    }
}

/// Waits up to `timeout_ms` for the next event and writes it as UTF-8 JSON
/// (`{"type": "...", "value": ...}`).
/// Returns 1 when an event was written, 0 on timeout, `KIT_ERR_DISPOSED` once the
/// player's streams have ended.
///
/// # Safety
/// `out_ptr` and `out_len` must be valid writable pointers.
#[no_mangle]
pub unsafe extern "C" fn kit_player_poll_event(
    id: i64,
    timeout_ms: u64,
    out_ptr: *mut *mut c_uchar,
    out_len: *mut usize,
) -> c_int {
    if out_ptr.is_null() || out_len.is_null() {
        return finish(Err(FfiError::NullPointer));
    }
    let entry = match lookup(id) {
        Ok(entry) => entry,
        Err(e) => return finish(Err(e)),
    };
    let event = match entry.events.recv_timeout(Duration::from_millis(timeout_ms)) {
        Ok(event) => event,
        Err(RecvTimeoutError::Timeout) => return 0,
        Err(RecvTimeoutError::Disconnected) => return finish(Err(PlayerError::Disposed.into())),
    };
    match serde_json::to_vec(&event) {
        Ok(json) => {
            unsafe { give_bytes(json, out_ptr, out_len) };
            1
        }
        Err(e) => finish(Err(e.into())),
    }
}

/// Writes the engine's native handle (the mpv process id).
///
/// # Safety
/// `out_handle` must be a valid writable pointer.
#[no_mangle]
pub unsafe extern "C" fn kit_player_handle(id: i64, out_handle: *mut i64) -> c_int {
    if out_handle.is_null() {
        return finish(Err(FfiError::NullPointer));
    }
    let handle = lookup(id).and_then(|entry| Ok(entry.player.handle()?));
    match handle {
        Ok(handle) => {
            unsafe { *out_handle = handle };
            KIT_OK
        }
        Err(e) => finish(Err(e)),
    }
}

/// Disposes the player and forgets its id. Disposing an unknown id is a no-op.
#[no_mangle]
pub extern "C" fn kit_player_dispose(id: i64) -> c_int {
    let entry = players().lock().remove(&id);
    if let Some(entry) = entry {
        entry.player.dispose();
    }
    KIT_OK
}

/// Copies the last error message of the calling thread into `out_buf` (NUL-terminated,
/// truncated to fit). Returns the full message length in bytes.
///
/// # Safety
/// `out_buf` must point to at least `out_len` writable bytes (or be NULL with `out_len` 0).
#[no_mangle]
pub unsafe extern "C" fn kit_last_error(out_buf: *mut c_char, out_len: usize) -> usize {
    LAST_ERROR.with(|last| {
        let last = last.borrow();
        if !out_buf.is_null() && out_len > 0 {
            let n = last.len().min(out_len - 1);
            unsafe {
                std::ptr::copy_nonoverlapping(last.as_ptr() as *const c_char, out_buf, n);
                *out_buf.add(n) = 0;
            }
        }
        last.len()
    })
}

/// Frees bytes returned by this library.
///
/// # Safety
/// `ptr`/`len` must come from this library and be freed exactly once.
#[no_mangle]
pub unsafe extern "C" fn kit_free_bytes(ptr: *mut c_uchar, len: usize) {
    if ptr.is_null() {
        return;
    }
    unsafe {
        drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(ptr, len)));
    }
}
