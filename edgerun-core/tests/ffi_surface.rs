//! C ABI surface exercised from Rust: handles, result codes, output
//! ownership and the streaming callback triple.

mod common;

use common::ScriptedLlm;
use edgerun_core::ffi::*;
use edgerun_core::service::ServiceInstance;
use edgerun_core::{Capability, Component};
use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;

#[test]
fn memory_index_roundtrip_through_abi() {
    assert_eq!(edgerun_init(), 0);

    let backend = CString::new("flat").unwrap();
    let metric = CString::new("cosine").unwrap();
    let mut handle = 0u64;
    unsafe {
        assert_eq!(
            edgerun_memory_create(backend.as_ptr(), 4, metric.as_ptr(), &mut handle),
            0
        );
    }
    assert_ne!(handle, 0);

    let id = CString::new("a").unwrap();
    let text = CString::new("alpha").unwrap();
    let vector = [1.0f32, 0.0, 0.0, 0.0];
    unsafe {
        assert_eq!(
            edgerun_memory_add(
                handle,
                id.as_ptr(),
                vector.as_ptr(),
                4,
                text.as_ptr(),
                std::ptr::null(),
            ),
            0
        );
    }

    let mut out: *mut c_char = std::ptr::null_mut();
    unsafe {
        assert_eq!(
            edgerun_memory_search(handle, vector.as_ptr(), 4, 1, &mut out),
            0
        );
    }
    let json = unsafe { CStr::from_ptr(out) }.to_str().unwrap().to_string();
    unsafe { edgerun_string_free(out) };
    assert!(json.contains("\"a\""), "search json: {json}");
    assert!(json.contains("alpha"));

    assert_eq!(edgerun_handle_destroy(handle), 0);
    assert_eq!(edgerun_handle_destroy(handle), 0, "destroy is idempotent");
    let mut out2: *mut c_char = std::ptr::null_mut();
    let rc = unsafe { edgerun_memory_search(handle, vector.as_ptr(), 4, 1, &mut out2) };
    assert!(rc < 0, "destroyed handle must be invalid, got {rc}");
}

#[test]
fn wav_conversion_through_abi() {
    let samples = [0.0f32, 0.5, -0.5, 1.0];
    let mut wav_ptr: *mut u8 = std::ptr::null_mut();
    let mut wav_len = 0usize;
    unsafe {
        assert_eq!(
            edgerun_audio_float32_to_wav(samples.as_ptr(), samples.len(), 22_050, &mut wav_ptr, &mut wav_len),
            0
        );
    }
    assert_eq!(wav_len, 44 + samples.len() * 2);

    let mut back_ptr: *mut f32 = std::ptr::null_mut();
    let mut back_len = 0usize;
    let mut rate = 0u32;
    unsafe {
        assert_eq!(
            edgerun_audio_wav_to_float32(wav_ptr, wav_len, &mut back_ptr, &mut back_len, &mut rate),
            0
        );
    }
    assert_eq!(back_len, samples.len());
    assert_eq!(rate, 22_050);

    unsafe {
        edgerun_buffer_free(wav_ptr, wav_len);
        edgerun_f32_free(back_ptr, back_len);
    }
}

struct StreamCapture {
    tokens: Vec<String>,
    result_json: Option<String>,
    errors: u32,
}

unsafe extern "C" fn capture_token(token: *const c_char, user_data: *mut c_void) -> i32 {
    let capture = unsafe { &mut *(user_data as *mut StreamCapture) };
    let token = unsafe { CStr::from_ptr(token) }.to_string_lossy().into_owned();
    capture.tokens.push(token);
    (capture.tokens.len() < 3) as i32
}

unsafe extern "C" fn capture_complete(result_json: *const c_char, user_data: *mut c_void) {
    let capture = unsafe { &mut *(user_data as *mut StreamCapture) };
    capture.result_json =
        Some(unsafe { CStr::from_ptr(result_json) }.to_string_lossy().into_owned());
}

unsafe extern "C" fn capture_error(_code: i32, _message: *const c_char, user_data: *mut c_void) {
    let capture = unsafe { &mut *(user_data as *mut StreamCapture) };
    capture.errors += 1;
}

#[test]
fn streaming_callbacks_cross_the_abi() {
    let (_component, handle) = Component::with_service(
        Capability::TextGeneration,
        ServiceInstance::TextGeneration(Box::new(ScriptedLlm::counting(20))),
    );

    let mut capture = StreamCapture {
        tokens: Vec::new(),
        result_json: None,
        errors: 0,
    };
    let prompt = CString::new("Count to one hundred:").unwrap();
    let rc = unsafe {
        edgerun_llm_generate_stream(
            handle.raw(),
            prompt.as_ptr(),
            std::ptr::null(),
            Some(capture_token),
            Some(capture_complete),
            Some(capture_error),
            &mut capture as *mut StreamCapture as *mut c_void,
        )
    };
    assert_eq!(rc, 0);
    assert_eq!(capture.tokens.len(), 3, "third token requested the stop");
    assert_eq!(capture.errors, 0);

    let result: serde_json::Value =
        serde_json::from_str(capture.result_json.as_deref().unwrap()).unwrap();
    assert_eq!(result["finish_reason"], "cancelled");
    assert_eq!(result["completion_tokens"], 3);
}

#[test]
fn null_arguments_report_stable_codes() {
    let mut out: *mut c_char = std::ptr::null_mut();
    let rc = unsafe { edgerun_llm_generate(1, std::ptr::null(), std::ptr::null(), &mut out) };
    assert_eq!(rc, -2, "null prompt is the null-pointer code");

    let rc = unsafe { edgerun_component_create(std::ptr::null(), std::ptr::null_mut()) };
    assert!(rc < 0);
}

#[test]
fn component_lifecycle_through_abi() {
    assert_eq!(edgerun_init(), 0);

    let capability = CString::new("text_generation").unwrap();
    let mut handle = 0u64;
    unsafe {
        assert_eq!(edgerun_component_create(capability.as_ptr(), &mut handle), 0);
    }

    let mut state = -1i32;
    unsafe {
        assert_eq!(edgerun_component_state(handle, &mut state), 0);
    }
    assert_eq!(state, 0, "fresh component is idle");

    assert_eq!(edgerun_component_cancel(handle), 0);
    assert_eq!(edgerun_component_unload(handle), 0);
    assert_eq!(edgerun_handle_destroy(handle), 0);
}
