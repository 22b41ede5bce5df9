//! Raw FFI bindings for the ONNX Runtime C API.
//!
//! The C API is a table of function pointers; `csrc/ort_shim.c` wraps the
//! entries we use in plain C functions so they can be declared here by
//! hand.

use std::os::raw::{c_char, c_int, c_void};

// Opaque types. The ORT C API only hands out pointers to these.
pub type OrtApi = c_void;
pub type OrtEnv = c_void;
pub type OrtSession = c_void;
pub type OrtSessionOptions = c_void;
pub type OrtRunOptions = c_void;
pub type OrtMemoryInfo = c_void;
pub type OrtValue = c_void;
pub type OrtStatus = c_void;
pub type OrtTypeInfo = c_void;

// ONNXType values.
pub const ONNX_TYPE_TENSOR: c_int = 1;
pub const ONNX_TYPE_SEQUENCE: c_int = 2;
pub const ONNX_TYPE_MAP: c_int = 3;

// Metadata namespaces understood by the shim's session accessors.
pub const NODE_INPUT: c_int = 0;
pub const NODE_OUTPUT: c_int = 1;
pub const NODE_OVERRIDABLE_INITIALIZER: c_int = 2;

unsafe extern "C" {
    pub fn ort_api() -> *const OrtApi;

    // --- Status ---
    pub fn ort_error_message(api: *const OrtApi, status: *mut OrtStatus) -> *const c_char;
    pub fn ort_error_code(api: *const OrtApi, status: *mut OrtStatus) -> c_int;
    pub fn ort_release_status(api: *const OrtApi, status: *mut OrtStatus);
    pub fn ort_allocator_free(api: *const OrtApi, p: *mut c_void);

    // --- Env ---
    pub fn ort_create_env(
        api: *const OrtApi,
        log_level: c_int,
        name: *const c_char,
        out: *mut *mut OrtEnv,
    ) -> *mut OrtStatus;
    pub fn ort_release_env(api: *const OrtApi, env: *mut OrtEnv);

    // --- Session options ---
    pub fn ort_create_session_options(api: *const OrtApi, out: *mut *mut OrtSessionOptions) -> *mut OrtStatus;
    pub fn ort_set_execution_mode(api: *const OrtApi, o: *mut OrtSessionOptions, mode: c_int) -> *mut OrtStatus;
    pub fn ort_set_memory_pattern(api: *const OrtApi, o: *mut OrtSessionOptions, enabled: c_int) -> *mut OrtStatus;
    pub fn ort_set_cpu_mem_arena(api: *const OrtApi, o: *mut OrtSessionOptions, enabled: c_int) -> *mut OrtStatus;
    /// A null prefix disables profiling.
    pub fn ort_set_profiling(api: *const OrtApi, o: *mut OrtSessionOptions, prefix: *const c_char) -> *mut OrtStatus;
    pub fn ort_set_log_id(api: *const OrtApi, o: *mut OrtSessionOptions, id: *const c_char) -> *mut OrtStatus;
    pub fn ort_set_log_severity(api: *const OrtApi, o: *mut OrtSessionOptions, level: c_int) -> *mut OrtStatus;
    pub fn ort_set_intra_op_threads(api: *const OrtApi, o: *mut OrtSessionOptions, n: c_int) -> *mut OrtStatus;
    pub fn ort_set_inter_op_threads(api: *const OrtApi, o: *mut OrtSessionOptions, n: c_int) -> *mut OrtStatus;
    pub fn ort_set_graph_optimization_level(api: *const OrtApi, o: *mut OrtSessionOptions, level: c_int) -> *mut OrtStatus;
    pub fn ort_set_optimized_model_path(api: *const OrtApi, o: *mut OrtSessionOptions, path: *const c_char) -> *mut OrtStatus;
    pub fn ort_append_cuda(api: *const OrtApi, o: *mut OrtSessionOptions, device_id: c_int) -> *mut OrtStatus;
    pub fn ort_append_tensorrt(api: *const OrtApi, o: *mut OrtSessionOptions, device_id: c_int) -> *mut OrtStatus;
    pub fn ort_append_provider(
        api: *const OrtApi,
        o: *mut OrtSessionOptions,
        name: *const c_char,
        keys: *const *const c_char,
        values: *const *const c_char,
        num_options: usize,
    ) -> *mut OrtStatus;
    pub fn ort_release_session_options(api: *const OrtApi, o: *mut OrtSessionOptions);

    // --- Session ---
    pub fn ort_create_session(
        api: *const OrtApi,
        env: *mut OrtEnv,
        path: *const c_char,
        opts: *mut OrtSessionOptions,
        out: *mut *mut OrtSession,
    ) -> *mut OrtStatus;
    pub fn ort_create_session_from_memory(
        api: *const OrtApi,
        env: *mut OrtEnv,
        model_data: *const c_void,
        model_data_len: usize,
        opts: *mut OrtSessionOptions,
        out: *mut *mut OrtSession,
    ) -> *mut OrtStatus;
    pub fn ort_session_node_count(api: *const OrtApi, s: *mut OrtSession, which: c_int, out: *mut usize) -> *mut OrtStatus;
    /// The returned name is freed with `ort_allocator_free`.
    pub fn ort_session_node_name(
        api: *const OrtApi,
        s: *mut OrtSession,
        which: c_int,
        index: usize,
        out: *mut *mut c_char,
    ) -> *mut OrtStatus;
    pub fn ort_session_node_type_info(
        api: *const OrtApi,
        s: *mut OrtSession,
        which: c_int,
        index: usize,
        out: *mut *mut OrtTypeInfo,
    ) -> *mut OrtStatus;
    /// The returned path is freed with `ort_allocator_free`.
    pub fn ort_end_profiling(api: *const OrtApi, s: *mut OrtSession, out: *mut *mut c_char) -> *mut OrtStatus;
    pub fn ort_release_session(api: *const OrtApi, s: *mut OrtSession);

    // --- Type info ---
    pub fn ort_type_info_onnx_type(api: *const OrtApi, info: *const OrtTypeInfo, out: *mut c_int) -> *mut OrtStatus;
    pub fn ort_type_info_tensor(
        api: *const OrtApi,
        info: *const OrtTypeInfo,
        elem: *mut c_int,
        ndim: *mut usize,
    ) -> *mut OrtStatus;
    pub fn ort_type_info_dims(api: *const OrtApi, info: *const OrtTypeInfo, dims: *mut i64, n: usize) -> *mut OrtStatus;
    /// Symbolic names stay owned by `info`.
    pub fn ort_type_info_symbolic_dims(
        api: *const OrtApi,
        info: *const OrtTypeInfo,
        names: *mut *const c_char,
        n: usize,
    ) -> *mut OrtStatus;
    pub fn ort_release_type_info(api: *const OrtApi, info: *mut OrtTypeInfo);

    // --- Values ---
    pub fn ort_create_cpu_memory_info(api: *const OrtApi, out: *mut *mut OrtMemoryInfo) -> *mut OrtStatus;
    pub fn ort_release_memory_info(api: *const OrtApi, i: *mut OrtMemoryInfo);
    /// Wraps caller-owned bytes; they must outlive the value.
    pub fn ort_create_tensor(
        api: *const OrtApi,
        info: *mut OrtMemoryInfo,
        data: *mut c_void,
        byte_len: usize,
        shape: *const i64,
        ndim: usize,
        elem: c_int,
        out: *mut *mut OrtValue,
    ) -> *mut OrtStatus;
    pub fn ort_create_string_tensor(
        api: *const OrtApi,
        shape: *const i64,
        ndim: usize,
        strings: *const *const c_char,
        count: usize,
        out: *mut *mut OrtValue,
    ) -> *mut OrtStatus;
    pub fn ort_value_type(api: *const OrtApi, v: *const OrtValue, out: *mut c_int) -> *mut OrtStatus;
    pub fn ort_tensor_info(api: *const OrtApi, v: *const OrtValue, elem: *mut c_int, ndim: *mut usize) -> *mut OrtStatus;
    pub fn ort_tensor_shape(api: *const OrtApi, v: *const OrtValue, dims: *mut i64, n: usize) -> *mut OrtStatus;
    pub fn ort_tensor_data(api: *const OrtApi, v: *mut OrtValue, out: *mut *mut c_void) -> *mut OrtStatus;
    pub fn ort_string_tensor_data_length(api: *const OrtApi, v: *const OrtValue, out: *mut usize) -> *mut OrtStatus;
    pub fn ort_string_tensor_content(
        api: *const OrtApi,
        v: *const OrtValue,
        buf: *mut c_void,
        buf_len: usize,
        offsets: *mut usize,
        count: usize,
    ) -> *mut OrtStatus;
    pub fn ort_value_count(api: *const OrtApi, v: *const OrtValue, out: *mut usize) -> *mut OrtStatus;
    pub fn ort_value_get(api: *const OrtApi, v: *const OrtValue, index: c_int, out: *mut *mut OrtValue) -> *mut OrtStatus;
    pub fn ort_release_value(api: *const OrtApi, v: *mut OrtValue);

    // --- Run ---
    pub fn ort_create_run_options(api: *const OrtApi, out: *mut *mut OrtRunOptions) -> *mut OrtStatus;
    pub fn ort_run_options_set_tag(api: *const OrtApi, r: *mut OrtRunOptions, tag: *const c_char) -> *mut OrtStatus;
    pub fn ort_run_options_set_log_severity(api: *const OrtApi, r: *mut OrtRunOptions, level: c_int) -> *mut OrtStatus;
    pub fn ort_run_options_set_terminate(api: *const OrtApi, r: *mut OrtRunOptions, terminate: c_int) -> *mut OrtStatus;
    pub fn ort_release_run_options(api: *const OrtApi, r: *mut OrtRunOptions);
    pub fn ort_run(
        api: *const OrtApi,
        session: *mut OrtSession,
        run_options: *mut OrtRunOptions,
        input_names: *const *const c_char,
        inputs: *const *const OrtValue,
        num_inputs: usize,
        output_names: *const *const c_char,
        num_outputs: usize,
        outputs: *mut *mut OrtValue,
    ) -> *mut OrtStatus;
}
