//! C ABI.
//!
//! Every operation is a C function returning `edgerun_result_t` (0 success,
//! negative codes from the error taxonomy) with outputs through pointer
//! parameters. Strings are UTF-8 `const char*`; binary blobs are
//! (pointer, size) pairs. The caller owns all inputs; the core allocates
//! outputs and pairs every allocation with an `edgerun_*_free` function.
//! Opaque handles are 64-bit typed integers.
//!
//! Discipline per entry point: null checks first, then UTF-8 validation,
//! then the core call; nothing unwraps.

use crate::audio;
use crate::benchmark::{BenchmarkTiming, StatsCollector};
use crate::component::{Component, StreamCallbacks};
use crate::error::{Result, RuntimeError};
use crate::events::{self, SubscriberId};
use crate::handle::{registry, CoreObject, Handle, HandleType};
use crate::index::{DistanceMetric, IndexBackend, IndexConfig, MemoryIndexObject};
use crate::platform::{self, LogLevel, PlatformAdapter};
use crate::rag::{RagConfig, RagPipeline};
use crate::registry::models::{Capability, Framework};
use crate::registry::providers::ServiceConfig;
use crate::service::llm::GenerationOptions;
use crate::service::stt::TranscriptionOptions;
use crate::service::tts::SynthesisOptions;
use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::str::FromStr;
use std::sync::Arc;

pub const EDGERUN_SUCCESS: i32 = 0;

/// Pointer wrapper so C user-data can cross thread boundaries. The host is
/// responsible for the pointee's thread safety, per the streaming contract.
#[derive(Clone, Copy)]
struct UserData(*mut c_void);
unsafe impl Send for UserData {}

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn code(result: Result<()>) -> i32 {
    match result {
        Ok(()) => EDGERUN_SUCCESS,
        Err(err) => err.code(),
    }
}

unsafe fn str_arg<'a>(ptr: *const c_char, name: &'static str) -> Result<&'a str> {
    if ptr.is_null() {
        return Err(RuntimeError::NullPointer(name));
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| RuntimeError::InvalidArgument(format!("{name} is not valid UTF-8")))
}

unsafe fn opt_str_arg<'a>(ptr: *const c_char, name: &'static str) -> Result<Option<&'a str>> {
    if ptr.is_null() {
        Ok(None)
    } else {
        unsafe { str_arg(ptr, name) }.map(Some)
    }
}

fn out_string(value: String, out: *mut *mut c_char) -> Result<()> {
    if out.is_null() {
        return Err(RuntimeError::NullPointer("out"));
    }
    let c_string = CString::new(value)
        .map_err(|_| RuntimeError::FormatError("output contains interior NUL".into()))?;
    unsafe { *out = c_string.into_raw() };
    Ok(())
}

fn out_f32_buffer(values: Vec<f32>, out_ptr: *mut *mut f32, out_len: *mut usize) -> Result<()> {
    if out_ptr.is_null() || out_len.is_null() {
        return Err(RuntimeError::NullPointer("out buffer"));
    }
    let boxed: Box<[f32]> = values.into_boxed_slice();
    unsafe {
        *out_len = boxed.len();
        *out_ptr = Box::into_raw(boxed) as *mut f32;
    }
    Ok(())
}

fn out_u8_buffer(values: Vec<u8>, out_ptr: *mut *mut u8, out_len: *mut usize) -> Result<()> {
    if out_ptr.is_null() || out_len.is_null() {
        return Err(RuntimeError::NullPointer("out buffer"));
    }
    let boxed: Box<[u8]> = values.into_boxed_slice();
    unsafe {
        *out_len = boxed.len();
        *out_ptr = Box::into_raw(boxed) as *mut u8;
    }
    Ok(())
}

unsafe fn samples_arg<'a>(ptr: *const f32, len: usize) -> Result<&'a [f32]> {
    if ptr.is_null() {
        return Err(RuntimeError::NullPointer("samples"));
    }
    Ok(unsafe { std::slice::from_raw_parts(ptr, len) })
}

fn component_arg(handle: u64, capability: Capability) -> Result<Arc<Component>> {
    crate::handle::lookup_component(Handle::from_raw(handle), capability)
}

fn parse_json_or<T: serde::de::DeserializeOwned + Default>(json: Option<&str>) -> Result<T> {
    match json {
        None => Ok(T::default()),
        Some("") => Ok(T::default()),
        Some(text) => serde_json::from_str(text)
            .map_err(|e| RuntimeError::InvalidArgument(format!("bad options json: {e}"))),
    }
}

// ─── Init / shutdown ──────────────────────────────────────────────────────────

/// Initialize the runtime: registers built-in providers. Idempotent.
#[no_mangle]
pub extern "C" fn edgerun_init() -> i32 {
    crate::init();
    EDGERUN_SUCCESS
}

/// Tear everything down: destroys all handles, unsubscribes all event
/// subscribers, clears registries. For embedder teardown and test isolation.
#[no_mangle]
pub extern "C" fn edgerun_shutdown() -> i32 {
    crate::shutdown();
    EDGERUN_SUCCESS
}

/// Install the std-backed platform adapter (desktop hosts). Mobile hosts
/// should inject their own callbacks via `edgerun_platform_install`.
#[no_mangle]
pub extern "C" fn edgerun_platform_use_native() -> i32 {
    code(platform::install(PlatformAdapter::native()))
}

// ─── Platform adapter injection ───────────────────────────────────────────────

/// Host-injected callbacks. Any pointer may be null; operations requiring a
/// missing callback fail with `PlatformNotConfigured`. `buffer_free` releases
/// buffers the host handed to `file_read`.
#[repr(C)]
#[derive(Clone, Copy)]
#[allow(non_camel_case_types)]
pub struct edgerun_platform_callbacks_t {
    pub file_exists: Option<unsafe extern "C" fn(path: *const c_char) -> i32>,
    pub file_read: Option<
        unsafe extern "C" fn(path: *const c_char, out_data: *mut *mut u8, out_size: *mut usize) -> i32,
    >,
    pub file_write:
        Option<unsafe extern "C" fn(path: *const c_char, data: *const u8, size: usize) -> i32>,
    pub file_delete: Option<unsafe extern "C" fn(path: *const c_char) -> i32>,
    pub buffer_free: Option<unsafe extern "C" fn(data: *mut u8, size: usize)>,
    pub secure_get: Option<
        unsafe extern "C" fn(key: *const c_char, out_value: *mut c_char, capacity: usize) -> i32,
    >,
    pub secure_set:
        Option<unsafe extern "C" fn(key: *const c_char, value: *const c_char) -> i32>,
    pub secure_delete: Option<unsafe extern "C" fn(key: *const c_char) -> i32>,
    pub log: Option<
        unsafe extern "C" fn(level: i32, category: *const c_char, message: *const c_char),
    >,
    pub now_ms: Option<unsafe extern "C" fn() -> i64>,
}

unsafe impl Send for edgerun_platform_callbacks_t {}
unsafe impl Sync for edgerun_platform_callbacks_t {}

/// Install host platform callbacks. Set-once; a second install fails.
///
/// # Safety
/// `callbacks` must point to a valid struct; the function pointers must stay
/// valid for the process lifetime.
#[no_mangle]
pub unsafe extern "C" fn edgerun_platform_install(
    callbacks: *const edgerun_platform_callbacks_t,
) -> i32 {
    if callbacks.is_null() {
        return RuntimeError::NullPointer("callbacks").code();
    }
    let cb = unsafe { *callbacks };
    let mut adapter = PlatformAdapter::default();

    if let Some(file_exists) = cb.file_exists {
        adapter.file_exists = Some(Box::new(move |path| {
            let Ok(c_path) = CString::new(path) else {
                return false;
            };
            unsafe { file_exists(c_path.as_ptr()) != 0 }
        }));
    }
    if let Some(file_read) = cb.file_read {
        let buffer_free = cb.buffer_free;
        adapter.file_read = Some(Box::new(move |path| {
            let c_path = CString::new(path).map_err(|_| "path contains NUL".to_string())?;
            let mut data: *mut u8 = std::ptr::null_mut();
            let mut size: usize = 0;
            let rc = unsafe { file_read(c_path.as_ptr(), &mut data, &mut size) };
            if rc != 0 || data.is_null() {
                return Err(format!("host file_read failed with {rc}"));
            }
            let bytes = unsafe { std::slice::from_raw_parts(data, size) }.to_vec();
            if let Some(free) = buffer_free {
                unsafe { free(data, size) };
            }
            Ok(bytes)
        }));
    }
    if let Some(file_write) = cb.file_write {
        adapter.file_write = Some(Box::new(move |path, data| {
            let c_path = CString::new(path).map_err(|_| "path contains NUL".to_string())?;
            let rc = unsafe { file_write(c_path.as_ptr(), data.as_ptr(), data.len()) };
            if rc == 0 {
                Ok(())
            } else {
                Err(format!("host file_write failed with {rc}"))
            }
        }));
    }
    if let Some(file_delete) = cb.file_delete {
        adapter.file_delete = Some(Box::new(move |path| {
            let c_path = CString::new(path).map_err(|_| "path contains NUL".to_string())?;
            let rc = unsafe { file_delete(c_path.as_ptr()) };
            if rc == 0 {
                Ok(())
            } else {
                Err(format!("host file_delete failed with {rc}"))
            }
        }));
    }
    if let Some(secure_set) = cb.secure_set {
        adapter.secure_set = Some(Box::new(move |key, value| {
            let (Ok(c_key), Ok(c_value)) = (CString::new(key), CString::new(value)) else {
                return Err("secure_set arguments contain NUL".to_string());
            };
            let rc = unsafe { secure_set(c_key.as_ptr(), c_value.as_ptr()) };
            if rc == 0 {
                Ok(())
            } else {
                Err(format!("host secure_set failed with {rc}"))
            }
        }));
    }
    if let Some(secure_get) = cb.secure_get {
        adapter.secure_get = Some(Box::new(move |key| {
            let Ok(c_key) = CString::new(key) else {
                return None;
            };
            let mut buffer = vec![0u8; 4096];
            let rc = unsafe { secure_get(c_key.as_ptr(), buffer.as_mut_ptr() as *mut c_char, buffer.len()) };
            if rc != 0 {
                return None;
            }
            let end = buffer.iter().position(|&b| b == 0).unwrap_or(buffer.len());
            String::from_utf8(buffer[..end].to_vec()).ok()
        }));
    }
    if let Some(secure_delete) = cb.secure_delete {
        adapter.secure_delete = Some(Box::new(move |key| {
            let Ok(c_key) = CString::new(key) else {
                return Err("key contains NUL".to_string());
            };
            let rc = unsafe { secure_delete(c_key.as_ptr()) };
            if rc == 0 {
                Ok(())
            } else {
                Err(format!("host secure_delete failed with {rc}"))
            }
        }));
    }
    if let Some(log) = cb.log {
        adapter.log = Some(Box::new(move |level, category, message| {
            let (Ok(c_category), Ok(c_message)) = (CString::new(category), CString::new(message))
            else {
                return;
            };
            let level_code = match level {
                LogLevel::Debug => 0,
                LogLevel::Info => 1,
                LogLevel::Warn => 2,
                LogLevel::Error => 3,
            };
            unsafe { log(level_code, c_category.as_ptr(), c_message.as_ptr()) };
        }));
    }
    if let Some(now_ms) = cb.now_ms {
        adapter.now_ms = Some(Box::new(move || unsafe { now_ms() }));
    }

    code(platform::install(adapter))
}

// ─── Components ───────────────────────────────────────────────────────────────

/// Create a component for a capability tag ("text_generation", "stt", …).
///
/// # Safety
/// `capability` must be a valid C string; `out_handle` must be writable.
#[no_mangle]
pub unsafe extern "C" fn edgerun_component_create(
    capability: *const c_char,
    out_handle: *mut u64,
) -> i32 {
    let result = (|| -> Result<()> {
        if out_handle.is_null() {
            return Err(RuntimeError::NullPointer("out_handle"));
        }
        let capability = Capability::from_str(unsafe { str_arg(capability, "capability")? })?;
        let (_, handle) = Component::create(capability);
        unsafe { *out_handle = handle.raw() };
        Ok(())
    })();
    code(result)
}

/// Load a model into a component. `framework_hint` and `config_json` may be
/// null.
///
/// # Safety
/// Pointers must be valid C strings or null where documented.
#[no_mangle]
pub unsafe extern "C" fn edgerun_component_load(
    handle: u64,
    model_ref: *const c_char,
    framework_hint: *const c_char,
    config_json: *const c_char,
) -> i32 {
    let result = (|| -> Result<()> {
        let model_ref = unsafe { str_arg(model_ref, "model_ref")? };
        let hint = unsafe { opt_str_arg(framework_hint, "framework_hint")? }
            .map(Framework::from_str)
            .transpose()?;
        let config: ServiceConfig =
            match unsafe { opt_str_arg(config_json, "config_json")? } {
                None | Some("") => ServiceConfig::default(),
                Some(text) => serde_json::from_str(text)
                    .map_err(|e| RuntimeError::InvalidArgument(format!("bad config json: {e}")))?,
            };
        let component = lookup_any_component(handle)?;
        component.load(model_ref, hint, &config)
    })();
    code(result)
}

/// Current lifecycle state: 0 idle, 1 loading, 2 ready, 3 busy,
/// 4 cancelling, 5 error.
///
/// # Safety
/// `out_state` must be writable.
#[no_mangle]
pub unsafe extern "C" fn edgerun_component_state(handle: u64, out_state: *mut i32) -> i32 {
    use crate::component::LifecycleState;
    let result = (|| -> Result<()> {
        if out_state.is_null() {
            return Err(RuntimeError::NullPointer("out_state"));
        }
        let component = lookup_any_component(handle)?;
        let state = match component.state() {
            LifecycleState::Idle => 0,
            LifecycleState::Loading => 1,
            LifecycleState::Ready => 2,
            LifecycleState::Busy => 3,
            LifecycleState::Cancelling => 4,
            LifecycleState::Error => 5,
        };
        unsafe { *out_state = state };
        Ok(())
    })();
    code(result)
}

#[no_mangle]
pub extern "C" fn edgerun_component_cancel(handle: u64) -> i32 {
    let result = lookup_any_component(handle).map(|c| c.cancel());
    code(result)
}

#[no_mangle]
pub extern "C" fn edgerun_component_unload(handle: u64) -> i32 {
    let result = lookup_any_component(handle).map(|c| c.unload());
    code(result)
}

/// Destroy any core handle. Idempotent; in-flight operations finish first.
#[no_mangle]
pub extern "C" fn edgerun_handle_destroy(handle: u64) -> i32 {
    code(registry().destroy(Handle::from_raw(handle)))
}

/// Find a component handle regardless of capability tag.
fn lookup_any_component(handle: u64) -> Result<Arc<Component>> {
    const CAPABILITIES: [Capability; 8] = [
        Capability::TextGeneration,
        Capability::Stt,
        Capability::Tts,
        Capability::Vad,
        Capability::Embeddings,
        Capability::VisionLanguage,
        Capability::Diffusion,
        Capability::WakeWord,
    ];
    for capability in CAPABILITIES {
        if let Ok(CoreObject::Component(c)) =
            registry().lookup(Handle::from_raw(handle), HandleType::Component(capability))
        {
            return Ok(c);
        }
    }
    Err(RuntimeError::InvalidHandle(handle))
}

// ─── Text generation ──────────────────────────────────────────────────────────

/// Blocking generation. `options_json` may be null for defaults. The result
/// JSON must be freed with `edgerun_string_free`.
///
/// # Safety
/// Pointers must be valid per the struct contract.
#[no_mangle]
pub unsafe extern "C" fn edgerun_llm_generate(
    handle: u64,
    prompt: *const c_char,
    options_json: *const c_char,
    out_result_json: *mut *mut c_char,
) -> i32 {
    let result = (|| -> Result<()> {
        let prompt = unsafe { str_arg(prompt, "prompt")? };
        let options: GenerationOptions =
            parse_json_or(unsafe { opt_str_arg(options_json, "options_json")? })?;
        let component = component_arg(handle, Capability::TextGeneration)?;
        let generation = component.generate(prompt, &options)?;
        let json = serde_json::to_string(&generation)
            .map_err(|e| RuntimeError::FormatError(e.to_string()))?;
        out_string(json, out_result_json)
    })();
    code(result)
}

/// Streaming generation with the callback triple. `on_token` returns nonzero
/// to continue, zero to cancel. Exactly one of `on_complete` (result JSON) or
/// `on_error` fires, after the last token. Pre-flight failures (bad
/// arguments, wrong state, busy) return a negative code and fire nothing.
///
/// # Safety
/// Callback pointers must be valid for the duration of the call; `user_data`
/// is passed through untouched and must be thread-safe if the host uses it
/// from the callbacks.
#[no_mangle]
pub unsafe extern "C" fn edgerun_llm_generate_stream(
    handle: u64,
    prompt: *const c_char,
    options_json: *const c_char,
    on_token: Option<unsafe extern "C" fn(token: *const c_char, user_data: *mut c_void) -> i32>,
    on_complete: Option<unsafe extern "C" fn(result_json: *const c_char, user_data: *mut c_void)>,
    on_error: Option<
        unsafe extern "C" fn(code: i32, message: *const c_char, user_data: *mut c_void),
    >,
    user_data: *mut c_void,
) -> i32 {
    let result = (|| -> Result<()> {
        let prompt = unsafe { str_arg(prompt, "prompt")? };
        let options: GenerationOptions =
            parse_json_or(unsafe { opt_str_arg(options_json, "options_json")? })?;
        let (Some(on_token), Some(on_complete), Some(on_error)) =
            (on_token, on_complete, on_error)
        else {
            return Err(RuntimeError::NullPointer("stream callbacks"));
        };
        let component = component_arg(handle, Capability::TextGeneration)?;

        let token_data = UserData(user_data);
        let complete_data = UserData(user_data);
        let error_data = UserData(user_data);

        component.generate_stream(
            prompt,
            &options,
            StreamCallbacks {
                on_token: Box::new(move |token: &str| {
                    let data = token_data;
                    let Ok(c_token) = CString::new(token) else {
                        return true;
                    };
                    unsafe { on_token(c_token.as_ptr(), data.0) != 0 }
                }),
                on_complete: Box::new(move |generation| {
                    let data = complete_data;
                    let json = serde_json::to_string(&generation).unwrap_or_default();
                    let Ok(c_json) = CString::new(json) else {
                        return;
                    };
                    unsafe { on_complete(c_json.as_ptr(), data.0) };
                }),
                on_error: Box::new(move |err| {
                    let data = error_data;
                    let Ok(c_message) = CString::new(err.to_string()) else {
                        return;
                    };
                    unsafe { on_error(err.code(), c_message.as_ptr(), data.0) };
                }),
            },
        )
    })();
    code(result)
}

// ─── Speech to text ───────────────────────────────────────────────────────────

/// # Safety
/// `samples` must point to `sample_count` floats.
#[no_mangle]
pub unsafe extern "C" fn edgerun_stt_transcribe(
    handle: u64,
    samples: *const f32,
    sample_count: usize,
    sample_rate: u32,
    options_json: *const c_char,
    out_result_json: *mut *mut c_char,
) -> i32 {
    let result = (|| -> Result<()> {
        let samples = unsafe { samples_arg(samples, sample_count)? };
        let options: TranscriptionOptions =
            parse_json_or(unsafe { opt_str_arg(options_json, "options_json")? })?;
        let component = component_arg(handle, Capability::Stt)?;
        let transcript = component.transcribe(samples, sample_rate, &options)?;
        let json = serde_json::to_string(&transcript)
            .map_err(|e| RuntimeError::FormatError(e.to_string()))?;
        out_string(json, out_result_json)
    })();
    code(result)
}

/// Open a push-based streaming session on an STT component. The session has
/// its own handle; destroy it with `edgerun_handle_destroy`.
///
/// # Safety
/// `out_session` must be writable.
#[no_mangle]
pub unsafe extern "C" fn edgerun_stt_stream_create(
    component: u64,
    out_session: *mut u64,
) -> i32 {
    let result = (|| -> Result<()> {
        if out_session.is_null() {
            return Err(RuntimeError::NullPointer("out_session"));
        }
        let component = component_arg(component, Capability::Stt)?;
        let (_, handle) = component.create_stt_stream()?;
        unsafe { *out_session = handle.raw() };
        Ok(())
    })();
    code(result)
}

fn stt_stream_arg(
    handle: u64,
) -> Result<Arc<parking_lot::Mutex<Box<dyn crate::service::stt::SttStream>>>> {
    match registry().lookup(Handle::from_raw(handle), HandleType::SttStream)? {
        CoreObject::SttStream(s) => Ok(s),
        _ => Err(RuntimeError::InvalidHandle(handle)),
    }
}

/// # Safety
/// `samples` must point to `sample_count` floats.
#[no_mangle]
pub unsafe extern "C" fn edgerun_stt_stream_feed(
    session: u64,
    samples: *const f32,
    sample_count: usize,
    sample_rate: u32,
) -> i32 {
    let result = (|| -> Result<()> {
        let samples = unsafe { samples_arg(samples, sample_count)? };
        stt_stream_arg(session)?.lock().feed_audio(samples, sample_rate)
    })();
    code(result)
}

/// # Safety
/// `out_is_endpoint` must be writable.
#[no_mangle]
pub unsafe extern "C" fn edgerun_stt_stream_is_endpoint(
    session: u64,
    out_is_endpoint: *mut i32,
) -> i32 {
    let result = (|| -> Result<()> {
        if out_is_endpoint.is_null() {
            return Err(RuntimeError::NullPointer("out_is_endpoint"));
        }
        let endpoint = stt_stream_arg(session)?.lock().is_endpoint();
        unsafe { *out_is_endpoint = endpoint as i32 };
        Ok(())
    })();
    code(result)
}

/// Decode the transcript accumulated so far; free with `edgerun_string_free`.
///
/// # Safety
/// `out_transcript` must be writable.
#[no_mangle]
pub unsafe extern "C" fn edgerun_stt_stream_decode(
    session: u64,
    out_transcript: *mut *mut c_char,
) -> i32 {
    let result = (|| -> Result<()> {
        let transcript = stt_stream_arg(session)?.lock().decode()?;
        out_string(transcript, out_transcript)
    })();
    code(result)
}

#[no_mangle]
pub extern "C" fn edgerun_stt_stream_input_finished(session: u64) -> i32 {
    let result = stt_stream_arg(session).map(|s| s.lock().input_finished());
    code(result)
}

#[no_mangle]
pub extern "C" fn edgerun_stt_stream_reset(session: u64) -> i32 {
    let result = stt_stream_arg(session).map(|s| s.lock().reset());
    code(result)
}

// ─── Text to speech ───────────────────────────────────────────────────────────

/// Synthesized samples are float32 mono; free with `edgerun_f32_free`.
///
/// # Safety
/// Output pointers must be writable.
#[no_mangle]
pub unsafe extern "C" fn edgerun_tts_synthesize(
    handle: u64,
    text: *const c_char,
    options_json: *const c_char,
    out_samples: *mut *mut f32,
    out_count: *mut usize,
    out_sample_rate: *mut u32,
) -> i32 {
    let result = (|| -> Result<()> {
        let text = unsafe { str_arg(text, "text")? };
        let options: SynthesisOptions =
            parse_json_or(unsafe { opt_str_arg(options_json, "options_json")? })?;
        let component = component_arg(handle, Capability::Tts)?;
        let buffer = component.synthesize(text, &options)?;
        if !out_sample_rate.is_null() {
            unsafe { *out_sample_rate = buffer.sample_rate };
        }
        out_f32_buffer(buffer.samples, out_samples, out_count)
    })();
    code(result)
}

// ─── Voice activity ───────────────────────────────────────────────────────────

/// # Safety
/// `samples` must point to `sample_count` floats; `out_is_speech` writable.
#[no_mangle]
pub unsafe extern "C" fn edgerun_vad_process(
    handle: u64,
    samples: *const f32,
    sample_count: usize,
    sample_rate: u32,
    out_is_speech: *mut i32,
) -> i32 {
    let result = (|| -> Result<()> {
        if out_is_speech.is_null() {
            return Err(RuntimeError::NullPointer("out_is_speech"));
        }
        let samples = unsafe { samples_arg(samples, sample_count)? };
        let component = component_arg(handle, Capability::Vad)?;
        let is_speech = component.vad_process(samples, sample_rate)?;
        unsafe { *out_is_speech = is_speech as i32 };
        Ok(())
    })();
    code(result)
}

// ─── Embeddings ───────────────────────────────────────────────────────────────

/// # Safety
/// Output pointers must be writable; free the vector with `edgerun_f32_free`.
#[no_mangle]
pub unsafe extern "C" fn edgerun_embeddings_embed(
    handle: u64,
    text: *const c_char,
    out_vector: *mut *mut f32,
    out_len: *mut usize,
) -> i32 {
    let result = (|| -> Result<()> {
        let text = unsafe { str_arg(text, "text")? };
        let component = component_arg(handle, Capability::Embeddings)?;
        let vector = component.embed(text)?;
        out_f32_buffer(vector, out_vector, out_len)
    })();
    code(result)
}

// ─── Memory index ─────────────────────────────────────────────────────────────

/// Create a vector index. `backend` is "flat" or "hnsw"; `metric` is "l2",
/// "cosine" or "inner_product".
///
/// # Safety
/// Strings must be valid; `out_handle` writable.
#[no_mangle]
pub unsafe extern "C" fn edgerun_memory_create(
    backend: *const c_char,
    dimension: usize,
    metric: *const c_char,
    out_handle: *mut u64,
) -> i32 {
    let result = (|| -> Result<()> {
        if out_handle.is_null() {
            return Err(RuntimeError::NullPointer("out_handle"));
        }
        if dimension == 0 {
            return Err(RuntimeError::InvalidArgument("dimension must be > 0".into()));
        }
        let backend = match unsafe { str_arg(backend, "backend")? } {
            "flat" => IndexBackend::Flat,
            "hnsw" => IndexBackend::Hnsw,
            other => {
                return Err(RuntimeError::InvalidArgument(format!(
                    "unknown index backend {other}"
                )))
            }
        };
        let metric = match unsafe { str_arg(metric, "metric")? } {
            "l2" => DistanceMetric::L2,
            "cosine" => DistanceMetric::Cosine,
            "inner_product" => DistanceMetric::InnerProduct,
            other => {
                return Err(RuntimeError::InvalidArgument(format!(
                    "unknown distance metric {other}"
                )))
            }
        };
        let (_, handle) = MemoryIndexObject::create(backend, IndexConfig { dimension, metric });
        unsafe { *out_handle = handle.raw() };
        Ok(())
    })();
    code(result)
}

fn memory_arg(handle: u64) -> Result<Arc<MemoryIndexObject>> {
    match registry().lookup(Handle::from_raw(handle), HandleType::MemoryIndex)? {
        CoreObject::MemoryIndex(m) => Ok(m),
        _ => Err(RuntimeError::InvalidHandle(handle)),
    }
}

/// # Safety
/// `vector` must point to `dimension` floats; strings valid; json may be null.
#[no_mangle]
pub unsafe extern "C" fn edgerun_memory_add(
    handle: u64,
    id: *const c_char,
    vector: *const f32,
    dimension: usize,
    text: *const c_char,
    metadata_json: *const c_char,
) -> i32 {
    let result = (|| -> Result<()> {
        let id = unsafe { str_arg(id, "id")? };
        let vector = unsafe { samples_arg(vector, dimension)? };
        let text = unsafe { opt_str_arg(text, "text")? }.unwrap_or("");
        let metadata = match unsafe { opt_str_arg(metadata_json, "metadata_json")? } {
            None | Some("") => None,
            Some(json) => Some(
                serde_json::from_str(json)
                    .map_err(|e| RuntimeError::InvalidArgument(format!("bad metadata json: {e}")))?,
            ),
        };
        memory_arg(handle)?.add(id, vector, text, metadata)
    })();
    code(result)
}

/// # Safety
/// `id` must be a valid C string.
#[no_mangle]
pub unsafe extern "C" fn edgerun_memory_remove(handle: u64, id: *const c_char) -> i32 {
    let result = (|| -> Result<()> {
        let id = unsafe { str_arg(id, "id")? };
        memory_arg(handle)?.delete_by_id(id)?;
        Ok(())
    })();
    code(result)
}

/// Results come back as a JSON array of `{id, score, text, metadata}`.
///
/// # Safety
/// `query` must point to `dimension` floats; `out_results_json` writable.
#[no_mangle]
pub unsafe extern "C" fn edgerun_memory_search(
    handle: u64,
    query: *const f32,
    dimension: usize,
    k: usize,
    out_results_json: *mut *mut c_char,
) -> i32 {
    let result = (|| -> Result<()> {
        let query = unsafe { samples_arg(query, dimension)? };
        let hits = memory_arg(handle)?.search(query, k, None)?;
        let json = serde_json::to_string(&hits)
            .map_err(|e| RuntimeError::FormatError(e.to_string()))?;
        out_string(json, out_results_json)
    })();
    code(result)
}

// ─── RAG ──────────────────────────────────────────────────────────────────────

/// Build a RAG pipeline over existing LLM and embeddings components.
///
/// # Safety
/// `config_json` may be null; `out_handle` must be writable.
#[no_mangle]
pub unsafe extern "C" fn edgerun_rag_create(
    llm_handle: u64,
    embeddings_handle: u64,
    config_json: *const c_char,
    out_handle: *mut u64,
) -> i32 {
    let result = (|| -> Result<()> {
        if out_handle.is_null() {
            return Err(RuntimeError::NullPointer("out_handle"));
        }
        let config: RagConfig = match unsafe { opt_str_arg(config_json, "config_json")? } {
            None | Some("") => RagConfig::default(),
            Some(text) => serde_json::from_str(text)
                .map_err(|e| RuntimeError::InvalidArgument(format!("bad config json: {e}")))?,
        };
        let llm = component_arg(llm_handle, Capability::TextGeneration)?;
        let embeddings = component_arg(embeddings_handle, Capability::Embeddings)?;
        let (_, handle) = RagPipeline::create(config, llm, embeddings)?;
        unsafe { *out_handle = handle.raw() };
        Ok(())
    })();
    code(result)
}

fn rag_arg(handle: u64) -> Result<Arc<RagPipeline>> {
    match registry().lookup(Handle::from_raw(handle), HandleType::Rag)? {
        CoreObject::Rag(r) => Ok(r),
        _ => Err(RuntimeError::InvalidHandle(handle)),
    }
}

/// # Safety
/// Strings must be valid; `metadata_json` may be null.
#[no_mangle]
pub unsafe extern "C" fn edgerun_rag_add_document(
    handle: u64,
    text: *const c_char,
    metadata_json: *const c_char,
) -> i32 {
    let result = (|| -> Result<()> {
        let text = unsafe { str_arg(text, "text")? };
        let metadata = match unsafe { opt_str_arg(metadata_json, "metadata_json")? } {
            None | Some("") => serde_json::json!({}),
            Some(json) => serde_json::from_str(json)
                .map_err(|e| RuntimeError::InvalidArgument(format!("bad metadata json: {e}")))?,
        };
        rag_arg(handle)?.add_document(text, metadata)?;
        Ok(())
    })();
    code(result)
}

/// Answer a question. Output JSON is `{"result": …, "metadata": …}`.
///
/// # Safety
/// Strings valid; `options_json` may be null; output freed by the caller.
#[no_mangle]
pub unsafe extern "C" fn edgerun_rag_query(
    handle: u64,
    question: *const c_char,
    options_json: *const c_char,
    out_response_json: *mut *mut c_char,
) -> i32 {
    let result = (|| -> Result<()> {
        let question = unsafe { str_arg(question, "question")? };
        let options: GenerationOptions =
            parse_json_or(unsafe { opt_str_arg(options_json, "options_json")? })?;
        let response = rag_arg(handle)?.query(question, &options)?;
        let json = serde_json::to_string(&response)
            .map_err(|e| RuntimeError::FormatError(e.to_string()))?;
        out_string(json, out_response_json)
    })();
    code(result)
}

// ─── Vision language / diffusion ──────────────────────────────────────────────

/// `image_json` is a tagged union: `{"kind":"file_path","path":…}`,
/// `{"kind":"rgb","data":[…],"width":…,"height":…}` or
/// `{"kind":"base64","data":…}`.
///
/// # Safety
/// Strings valid; `out_result_json` writable.
#[no_mangle]
pub unsafe extern "C" fn edgerun_vlm_process(
    handle: u64,
    image_json: *const c_char,
    prompt: *const c_char,
    options_json: *const c_char,
    out_result_json: *mut *mut c_char,
) -> i32 {
    let result = (|| -> Result<()> {
        let image: crate::service::vlm::ImageInput =
            serde_json::from_str(unsafe { str_arg(image_json, "image_json")? })
                .map_err(|e| RuntimeError::InvalidArgument(format!("bad image json: {e}")))?;
        let prompt = unsafe { str_arg(prompt, "prompt")? };
        let options: GenerationOptions =
            parse_json_or(unsafe { opt_str_arg(options_json, "options_json")? })?;
        let component = component_arg(handle, Capability::VisionLanguage)?;
        let generation = component.vlm_process(&image, prompt, &options)?;
        let json = serde_json::to_string(&generation)
            .map_err(|e| RuntimeError::FormatError(e.to_string()))?;
        out_string(json, out_result_json)
    })();
    code(result)
}

/// Generate an image. Output RGB bytes are freed with `edgerun_buffer_free`.
/// `progress` may be null; returning zero from it cancels the run.
///
/// # Safety
/// Pointers must be valid per the struct contract.
#[no_mangle]
pub unsafe extern "C" fn edgerun_diffusion_generate(
    handle: u64,
    options_json: *const c_char,
    progress: Option<unsafe extern "C" fn(step: u32, total: u32, user_data: *mut c_void) -> i32>,
    user_data: *mut c_void,
    out_rgb: *mut *mut u8,
    out_size: *mut usize,
    out_width: *mut u32,
    out_height: *mut u32,
) -> i32 {
    let result = (|| -> Result<()> {
        let options: crate::service::diffusion::DiffusionOptions =
            serde_json::from_str(unsafe { str_arg(options_json, "options_json")? })
                .map_err(|e| RuntimeError::InvalidArgument(format!("bad options json: {e}")))?;
        let component = component_arg(handle, Capability::Diffusion)?;

        let data = UserData(user_data);
        let mut forward;
        let progress_cb: Option<&mut dyn FnMut(u32, u32) -> bool> = match progress {
            Some(progress) => {
                forward = move |step: u32, total: u32| -> bool {
                    let captured = data;
                    unsafe { progress(step, total, captured.0) != 0 }
                };
                Some(&mut forward)
            }
            None => None,
        };

        let image = component.diffusion_generate(&options, progress_cb)?;
        if !out_width.is_null() {
            unsafe { *out_width = image.width };
        }
        if !out_height.is_null() {
            unsafe { *out_height = image.height };
        }
        out_u8_buffer(image.rgb, out_rgb, out_size)
    })();
    code(result)
}

// ─── Voice agent ──────────────────────────────────────────────────────────────

/// # Safety
/// `config_json` may be null; `out_handle` must be writable.
#[no_mangle]
pub unsafe extern "C" fn edgerun_voice_agent_create(
    config_json: *const c_char,
    out_handle: *mut u64,
) -> i32 {
    use crate::voice::{VoiceAgentConfig, VoiceAgentPipeline};
    let result = (|| -> Result<()> {
        if out_handle.is_null() {
            return Err(RuntimeError::NullPointer("out_handle"));
        }
        let config = match unsafe { opt_str_arg(config_json, "config_json")? } {
            None | Some("") => VoiceAgentConfig::default(),
            Some(text) => {
                // Only the tunables cross the ABI; nested option structs keep
                // their defaults.
                let value: serde_json::Value = serde_json::from_str(text)
                    .map_err(|e| RuntimeError::InvalidArgument(format!("bad config json: {e}")))?;
                let mut config = VoiceAgentConfig::default();
                if let Some(rate) = value.get("sample_rate").and_then(|v| v.as_u64()) {
                    config.sample_rate = rate as u32;
                }
                if let Some(ms) = value.get("min_silence_duration_ms").and_then(|v| v.as_f64()) {
                    config.min_silence_duration_ms = ms;
                }
                config
            }
        };
        let (_, handle) = VoiceAgentPipeline::create(config);
        unsafe { *out_handle = handle.raw() };
        Ok(())
    })();
    code(result)
}

fn voice_agent_arg(handle: u64) -> Result<Arc<crate::voice::VoiceAgentPipeline>> {
    match registry().lookup(Handle::from_raw(handle), HandleType::VoiceAgent)? {
        CoreObject::VoiceAgent(v) => Ok(v),
        _ => Err(RuntimeError::InvalidHandle(handle)),
    }
}

/// Attach a stage component. `stage` is "vad", "stt", "llm" or "tts".
///
/// # Safety
/// `stage` must be a valid C string.
#[no_mangle]
pub unsafe extern "C" fn edgerun_voice_agent_set_component(
    handle: u64,
    stage: *const c_char,
    component: u64,
) -> i32 {
    let result = (|| -> Result<()> {
        let agent = voice_agent_arg(handle)?;
        match unsafe { str_arg(stage, "stage")? } {
            "vad" => agent.set_vad(component_arg(component, Capability::Vad)?),
            "stt" => agent.set_stt(component_arg(component, Capability::Stt)?),
            "llm" => agent.set_llm(component_arg(component, Capability::TextGeneration)?),
            "tts" => agent.set_tts(component_arg(component, Capability::Tts)?),
            other => Err(RuntimeError::InvalidArgument(format!(
                "unknown voice agent stage {other}"
            ))),
        }
    })();
    code(result)
}

/// Per-stage readiness as JSON `{"vad":…,"stt":…,"llm":…,"tts":…}`.
///
/// # Safety
/// `out_json` must be writable.
#[no_mangle]
pub unsafe extern "C" fn edgerun_voice_agent_readiness(
    handle: u64,
    out_json: *mut *mut c_char,
) -> i32 {
    let result = (|| -> Result<()> {
        let readiness = voice_agent_arg(handle)?.readiness();
        let json = serde_json::to_string(&readiness)
            .map_err(|e| RuntimeError::FormatError(e.to_string()))?;
        out_string(json, out_json)
    })();
    code(result)
}

/// Feed one audio frame. When a turn completes, `on_audio` has received the
/// synthesized chunks and `out_turn_json` is set to the turn result
/// (`{"transcript":…,"response":…,…}`); otherwise it is set to null.
/// Returning zero from `on_audio` aborts the turn.
///
/// # Safety
/// `frame` must point to `frame_len` floats; callbacks valid for the call.
#[no_mangle]
pub unsafe extern "C" fn edgerun_voice_agent_process(
    handle: u64,
    frame: *const f32,
    frame_len: usize,
    on_audio: Option<
        unsafe extern "C" fn(samples: *const f32, count: usize, user_data: *mut c_void) -> i32,
    >,
    user_data: *mut c_void,
    out_turn_json: *mut *mut c_char,
) -> i32 {
    let result = (|| -> Result<()> {
        if out_turn_json.is_null() {
            return Err(RuntimeError::NullPointer("out_turn_json"));
        }
        unsafe { *out_turn_json = std::ptr::null_mut() };
        let frame = unsafe { samples_arg(frame, frame_len)? };
        let agent = voice_agent_arg(handle)?;

        let data = UserData(user_data);
        let mut sink = |chunk: &[f32]| -> bool {
            let captured = data;
            match on_audio {
                Some(on_audio) => unsafe { on_audio(chunk.as_ptr(), chunk.len(), captured.0) != 0 },
                None => true,
            }
        };

        if let Some(turn) = agent.process_audio(frame, &mut sink)? {
            let json = serde_json::to_string(&turn)
                .map_err(|e| RuntimeError::FormatError(e.to_string()))?;
            out_string(json, out_turn_json)?;
        }
        Ok(())
    })();
    code(result)
}

#[no_mangle]
pub extern "C" fn edgerun_voice_agent_cancel(handle: u64) -> i32 {
    let result = voice_agent_arg(handle).map(|agent| agent.cancel());
    code(result)
}

// ─── Audio utilities ──────────────────────────────────────────────────────────

/// # Safety
/// `samples` must point to `sample_count` floats; output pointers writable.
/// Free the WAV bytes with `edgerun_buffer_free`.
#[no_mangle]
pub unsafe extern "C" fn edgerun_audio_float32_to_wav(
    samples: *const f32,
    sample_count: usize,
    sample_rate: u32,
    out_wav: *mut *mut u8,
    out_size: *mut usize,
) -> i32 {
    let result = (|| -> Result<()> {
        let samples = unsafe { samples_arg(samples, sample_count)? };
        let wav = audio::float32_to_wav(samples, sample_rate)?;
        out_u8_buffer(wav, out_wav, out_size)
    })();
    code(result)
}

/// # Safety
/// `wav` must point to `size` bytes; output pointers writable. Free the
/// samples with `edgerun_f32_free`.
#[no_mangle]
pub unsafe extern "C" fn edgerun_audio_wav_to_float32(
    wav: *const u8,
    size: usize,
    out_samples: *mut *mut f32,
    out_count: *mut usize,
    out_sample_rate: *mut u32,
) -> i32 {
    let result = (|| -> Result<()> {
        if wav.is_null() {
            return Err(RuntimeError::NullPointer("wav"));
        }
        let bytes = unsafe { std::slice::from_raw_parts(wav, size) };
        let (samples, rate) = audio::wav_to_float32(bytes)?;
        if !out_sample_rate.is_null() {
            unsafe { *out_sample_rate = rate };
        }
        out_f32_buffer(samples, out_samples, out_count)
    })();
    code(result)
}

// ─── Benchmark statistics ─────────────────────────────────────────────────────

/// # Safety
/// `out_handle` must be writable.
#[no_mangle]
pub unsafe extern "C" fn edgerun_benchmark_stats_create(out_handle: *mut u64) -> i32 {
    let result = (|| -> Result<()> {
        if out_handle.is_null() {
            return Err(RuntimeError::NullPointer("out_handle"));
        }
        let collector = Arc::new(StatsCollector::new());
        let handle = registry().register(CoreObject::Stats(collector), HandleType::BenchmarkStats);
        unsafe { *out_handle = handle.raw() };
        Ok(())
    })();
    code(result)
}

fn stats_arg(handle: u64) -> Result<Arc<StatsCollector>> {
    match registry().lookup(Handle::from_raw(handle), HandleType::BenchmarkStats)? {
        CoreObject::Stats(s) => Ok(s),
        _ => Err(RuntimeError::InvalidHandle(handle)),
    }
}

/// Record one observation from its JSON form (the `timing` object of a
/// generation result).
///
/// # Safety
/// `timing_json` must be a valid C string.
#[no_mangle]
pub unsafe extern "C" fn edgerun_benchmark_stats_record(
    handle: u64,
    timing_json: *const c_char,
) -> i32 {
    let result = (|| -> Result<()> {
        let json = unsafe { str_arg(timing_json, "timing_json")? };
        let timing: BenchmarkTiming = serde_json::from_str(json)
            .map_err(|e| RuntimeError::InvalidArgument(format!("bad timing json: {e}")))?;
        stats_arg(handle)?.record(&timing);
        Ok(())
    })();
    code(result)
}

/// # Safety
/// `out_json` must be writable; free with `edgerun_string_free`.
#[no_mangle]
pub unsafe extern "C" fn edgerun_benchmark_stats_summary(
    handle: u64,
    out_json: *mut *mut c_char,
) -> i32 {
    let result = (|| -> Result<()> {
        let json = stats_arg(handle)?.summary_json()?;
        out_string(json, out_json)
    })();
    code(result)
}

// ─── Events ───────────────────────────────────────────────────────────────────

/// Subscribe to bus events. `mask` is a bitwise OR of category bits
/// (lifecycle 1, inference 2, download 4, memory 8, voice 16, error 32,
/// bus 64); pass `0xFFFFFFFF` for everything. The callback receives each
/// event as a JSON string on a dispatch thread owned by the core.
///
/// # Safety
/// `callback` must stay valid until unsubscribed; `user_data` must be
/// thread-safe; `out_subscriber` writable.
#[no_mangle]
pub unsafe extern "C" fn edgerun_events_subscribe(
    mask: u32,
    callback: Option<unsafe extern "C" fn(event_json: *const c_char, user_data: *mut c_void)>,
    user_data: *mut c_void,
    out_subscriber: *mut u64,
) -> i32 {
    let result = (|| -> Result<()> {
        let Some(callback) = callback else {
            return Err(RuntimeError::NullPointer("callback"));
        };
        if out_subscriber.is_null() {
            return Err(RuntimeError::NullPointer("out_subscriber"));
        }
        let data = UserData(user_data);
        let id = events::bus().subscribe(mask, move |event| {
            let captured = data;
            let Ok(json) = serde_json::to_string(event) else {
                return;
            };
            let Ok(c_json) = CString::new(json) else {
                return;
            };
            unsafe { callback(c_json.as_ptr(), captured.0) };
        });
        unsafe { *out_subscriber = subscriber_raw(id) };
        Ok(())
    })();
    code(result)
}

/// Guaranteed: no further callbacks fire for this subscriber after return.
#[no_mangle]
pub extern "C" fn edgerun_events_unsubscribe(subscriber: u64) -> i32 {
    events::bus().unsubscribe(subscriber_from_raw(subscriber));
    EDGERUN_SUCCESS
}

fn subscriber_raw(id: SubscriberId) -> u64 {
    id.raw()
}

fn subscriber_from_raw(raw: u64) -> SubscriberId {
    SubscriberId::from_raw(raw)
}

// ─── Frees ────────────────────────────────────────────────────────────────────

/// # Safety
/// `ptr` must come from this library's string outputs; double-free is UB.
#[no_mangle]
pub unsafe extern "C" fn edgerun_string_free(ptr: *mut c_char) {
    if !ptr.is_null() {
        unsafe {
            let _ = CString::from_raw(ptr);
        }
    }
}

/// # Safety
/// `ptr`/`len` must come from this library's byte-buffer outputs.
#[no_mangle]
pub unsafe extern "C" fn edgerun_buffer_free(ptr: *mut u8, len: usize) {
    if !ptr.is_null() {
        unsafe {
            let _ = Box::from_raw(std::ptr::slice_from_raw_parts_mut(ptr, len));
        }
    }
}

/// # Safety
/// `ptr`/`len` must come from this library's float-buffer outputs.
#[no_mangle]
pub unsafe extern "C" fn edgerun_f32_free(ptr: *mut f32, len: usize) {
    if !ptr.is_null() {
        unsafe {
            let _ = Box::from_raw(std::ptr::slice_from_raw_parts_mut(ptr, len));
        }
    }
}
