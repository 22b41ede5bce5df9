//! ONNX Runtime engine behind the `onnxruntime` feature.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_void};
use std::path::PathBuf;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use crate::element::ElementType;
use crate::engine::{Engine, EngineModel, GraphMetadata, ModelSource};
use crate::error::{ErrorCode, OrtError, Result};
use crate::ffi;
use crate::metadata::{MetadataMap, NodeMetadata};
use crate::options::{ExecutionProvider, RunOptions, SessionOptions};
use crate::tensor::{element_count, Tensor, TensorData};
use crate::value::{MapValue, NamedValue, Value};

struct ApiPtr(*const ffi::OrtApi);

// The function table is immutable and process-wide.
unsafe impl Send for ApiPtr {}
unsafe impl Sync for ApiPtr {}

static API: OnceCell<ApiPtr> = OnceCell::new();

/// Gets the ORT API pointer (cached after first call).
fn api() -> *const ffi::OrtApi {
    API.get_or_init(|| ApiPtr(unsafe { ffi::ort_api() })).0
}

/// Converts an OrtStatus to a Rust Result.
fn check_status(status: *mut ffi::OrtStatus) -> Result<()> {
    if status.is_null() {
        return Ok(());
    }
    let (code, msg) = unsafe {
        let code = ffi::ort_error_code(api(), status);
        let ptr = ffi::ort_error_message(api(), status);
        let s = CStr::from_ptr(ptr).to_string_lossy().into_owned();
        ffi::ort_release_status(api(), status);
        (code, s)
    };
    Err(OrtError::engine(ErrorCode::from_raw(code), msg))
}

fn c_string(s: &str) -> Result<CString> {
    CString::new(s).map_err(|e| OrtError::InvalidOption(e.to_string()))
}

/// Takes ownership of an allocator-owned C string.
unsafe fn take_allocated(p: *mut c_char) -> String {
    if p.is_null() {
        return String::new();
    }
    let s = unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned();
    unsafe { ffi::ort_allocator_free(api(), p as *mut c_void) };
    s
}

// ---------------------------------------------------------------------------
// Env
// ---------------------------------------------------------------------------

struct EnvHandle(*mut ffi::OrtEnv);

unsafe impl Send for EnvHandle {}
unsafe impl Sync for EnvHandle {}

// ONNX Runtime only allows one Env per process. It lives until exit.
static ENV: OnceCell<EnvHandle> = OnceCell::new();

/// Engine backed by the ONNX Runtime shared library.
pub struct NativeEngine {
    env: &'static EnvHandle,
}

impl NativeEngine {
    /// Creates the process-wide ORT environment on first use. Later calls
    /// share it; `name` only matters for the first.
    pub fn new(name: &str) -> Result<Self> {
        let env = ENV.get_or_try_init(|| {
            let c_name = c_string(name)?;
            let mut env: *mut ffi::OrtEnv = ptr::null_mut();
            // Warning severity; per-session levels are set on the options.
            check_status(unsafe { ffi::ort_create_env(api(), 2, c_name.as_ptr(), &mut env) })?;
            debug!(name, "onnxruntime env created");
            Ok::<_, OrtError>(EnvHandle(env))
        })?;
        Ok(Self { env })
    }
}

struct SessionOptionsGuard(*mut ffi::OrtSessionOptions);

impl Drop for SessionOptionsGuard {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { ffi::ort_release_session_options(api(), self.0) };
        }
    }
}

fn build_session_options(options: &SessionOptions) -> Result<SessionOptionsGuard> {
    let mut raw: *mut ffi::OrtSessionOptions = ptr::null_mut();
    check_status(unsafe { ffi::ort_create_session_options(api(), &mut raw) })?;
    let guard = SessionOptionsGuard(raw);
    let o = guard.0;
    let a = api();

    unsafe {
        check_status(ffi::ort_set_execution_mode(a, o, options.execution_mode() as c_int))?;
        check_status(ffi::ort_set_memory_pattern(a, o, options.enable_memory_pattern() as c_int))?;
        check_status(ffi::ort_set_cpu_mem_arena(a, o, options.enable_cpu_mem_arena() as c_int))?;
        if options.enable_profiling() {
            let prefix = c_string(options.profile_output_prefix())?;
            check_status(ffi::ort_set_profiling(a, o, prefix.as_ptr()))?;
        } else {
            check_status(ffi::ort_set_profiling(a, o, ptr::null()))?;
        }
        let log_id = c_string(options.log_id())?;
        check_status(ffi::ort_set_log_id(a, o, log_id.as_ptr()))?;
        check_status(ffi::ort_set_log_severity(a, o, options.log_level() as c_int))?;
        check_status(ffi::ort_set_intra_op_threads(a, o, options.intra_op_num_threads()))?;
        check_status(ffi::ort_set_inter_op_threads(a, o, options.inter_op_num_threads()))?;
        check_status(ffi::ort_set_graph_optimization_level(
            a,
            o,
            options.graph_optimization_level() as c_int,
        ))?;
        if let Some(path) = options.optimized_model_path() {
            let path = c_string(&path.to_string_lossy())?;
            check_status(ffi::ort_set_optimized_model_path(a, o, path.as_ptr()))?;
        }
    }

    for provider in options.execution_providers() {
        append_provider(o, provider)?;
        debug!(provider = %provider, "execution provider appended");
    }
    Ok(guard)
}

fn append_provider(o: *mut ffi::OrtSessionOptions, provider: &ExecutionProvider) -> Result<()> {
    let a = api();
    match provider {
        // CPU is always registered last by ORT; only the arena is tunable.
        ExecutionProvider::Cpu { use_arena } => {
            check_status(unsafe { ffi::ort_set_cpu_mem_arena(a, o, *use_arena as c_int) })
        }
        ExecutionProvider::Cuda { device_id } => {
            check_status(unsafe { ffi::ort_append_cuda(a, o, *device_id) })
        }
        ExecutionProvider::Tensorrt { device_id } => {
            check_status(unsafe { ffi::ort_append_tensorrt(a, o, *device_id) })
        }
        ExecutionProvider::Named { name, options } => {
            let c_name = c_string(name)?;
            let keys = options.keys().map(|k| c_string(k)).collect::<Result<Vec<_>>>()?;
            let values = options.values().map(|v| c_string(v)).collect::<Result<Vec<_>>>()?;
            let key_ptrs: Vec<*const c_char> = keys.iter().map(|s| s.as_ptr()).collect();
            let value_ptrs: Vec<*const c_char> = values.iter().map(|s| s.as_ptr()).collect();
            check_status(unsafe {
                ffi::ort_append_provider(
                    a,
                    o,
                    c_name.as_ptr(),
                    key_ptrs.as_ptr(),
                    value_ptrs.as_ptr(),
                    key_ptrs.len(),
                )
            })
        }
    }
}

fn as_load_error(e: OrtError) -> OrtError {
    match e {
        OrtError::Engine { code, message } => OrtError::ModelLoad { code, message },
        other => other,
    }
}

impl Engine for NativeEngine {
    fn name(&self) -> &str {
        "onnxruntime"
    }

    fn load(&self, source: ModelSource<'_>, options: &SessionOptions) -> Result<Box<dyn EngineModel>> {
        let opts = build_session_options(options)?;
        let mut session: *mut ffi::OrtSession = ptr::null_mut();
        let status = match source {
            ModelSource::Path(path) => {
                let c_path = c_string(&path.to_string_lossy())?;
                unsafe { ffi::ort_create_session(api(), self.env.0, c_path.as_ptr(), opts.0, &mut session) }
            }
            ModelSource::Memory(data) => {
                if data.is_empty() {
                    return Err(OrtError::EmptyData);
                }
                unsafe {
                    ffi::ort_create_session_from_memory(
                        api(),
                        self.env.0,
                        data.as_ptr() as *const _,
                        data.len(),
                        opts.0,
                        &mut session,
                    )
                }
            }
        };
        drop(opts);
        check_status(status).map_err(as_load_error)?;

        let mut model = NativeModel {
            session,
            metadata: GraphMetadata::default(),
            profiling: AtomicBool::new(options.enable_profiling()),
        };
        model.metadata = GraphMetadata {
            inputs: read_metadata(session, ffi::NODE_INPUT)?,
            outputs: read_metadata(session, ffi::NODE_OUTPUT)?,
            overridable_initializers: read_metadata(session, ffi::NODE_OVERRIDABLE_INITIALIZER)?,
        };
        Ok(Box::new(model))
    }
}

struct TypeInfoGuard(*mut ffi::OrtTypeInfo);

impl Drop for TypeInfoGuard {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { ffi::ort_release_type_info(api(), self.0) };
        }
    }
}

fn read_metadata(session: *mut ffi::OrtSession, which: c_int) -> Result<MetadataMap> {
    let a = api();
    let mut count = 0usize;
    check_status(unsafe { ffi::ort_session_node_count(a, session, which, &mut count) })?;

    let mut map = MetadataMap::new();
    for i in 0..count {
        let mut name_ptr: *mut c_char = ptr::null_mut();
        check_status(unsafe { ffi::ort_session_node_name(a, session, which, i, &mut name_ptr) })?;
        let name = unsafe { take_allocated(name_ptr) };

        let mut info: *mut ffi::OrtTypeInfo = ptr::null_mut();
        check_status(unsafe { ffi::ort_session_node_type_info(a, session, which, i, &mut info) })?;
        let info = TypeInfoGuard(info);

        let mut onnx_type: c_int = 0;
        check_status(unsafe { ffi::ort_type_info_onnx_type(a, info.0, &mut onnx_type) })?;
        let meta = match onnx_type {
            ffi::ONNX_TYPE_TENSOR => read_tensor_type(&info)?,
            ffi::ONNX_TYPE_SEQUENCE => NodeMetadata::sequence(),
            ffi::ONNX_TYPE_MAP => NodeMetadata::map(),
            other => {
                return Err(OrtError::engine(
                    ErrorCode::NotImplemented,
                    format!("{name}: unsupported ONNX value type {other}"),
                ));
            }
        };
        map.insert(name, meta)?;
    }
    Ok(map)
}

fn read_tensor_type(info: &TypeInfoGuard) -> Result<NodeMetadata> {
    let a = api();
    let mut elem: c_int = 0;
    let mut ndim = 0usize;
    check_status(unsafe { ffi::ort_type_info_tensor(a, info.0, &mut elem, &mut ndim) })?;

    let mut dims = vec![0i64; ndim];
    let mut syms: Vec<*const c_char> = vec![ptr::null(); ndim];
    if ndim > 0 {
        check_status(unsafe { ffi::ort_type_info_dims(a, info.0, dims.as_mut_ptr(), ndim) })?;
        check_status(unsafe { ffi::ort_type_info_symbolic_dims(a, info.0, syms.as_mut_ptr(), ndim) })?;
    }
    let symbolic = syms
        .iter()
        .map(|&p| {
            if p.is_null() {
                String::new()
            } else {
                unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned()
            }
        })
        .collect();
    NodeMetadata::tensor(ElementType::from_tag(elem)?, dims, symbolic)
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// Releases an OrtValue on drop.
struct ValueGuard(*mut ffi::OrtValue);

impl Drop for ValueGuard {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { ffi::ort_release_value(api(), self.0) };
        }
    }
}

/// A feed value plus the bytes it points into.
struct Feed {
    value: ValueGuard,
    _pinned: Vec<u8>,
}

fn create_feed(name: &str, value: &Value) -> Result<Feed> {
    let tensor = match value {
        Value::Tensor(t) => t,
        other => {
            return Err(OrtError::engine(
                ErrorCode::NotImplemented,
                format!("{name}: {} inputs are not supported", other.kind()),
            ));
        }
    };
    let a = api();
    let shape = tensor.shape();
    let mut out: *mut ffi::OrtValue = ptr::null_mut();

    if let TensorData::String(strings) = tensor.data() {
        let c_strings = strings.iter().map(|s| c_string(s)).collect::<Result<Vec<_>>>()?;
        let ptrs: Vec<*const c_char> = c_strings.iter().map(|s| s.as_ptr()).collect();
        check_status(unsafe {
            ffi::ort_create_string_tensor(a, shape.as_ptr(), shape.len(), ptrs.as_ptr(), ptrs.len(), &mut out)
        })?;
        return Ok(Feed {
            value: ValueGuard(out),
            _pinned: Vec::new(),
        });
    }

    let mut bytes = tensor.data().to_le_bytes().unwrap_or_default();
    let mut mem_info: *mut ffi::OrtMemoryInfo = ptr::null_mut();
    check_status(unsafe { ffi::ort_create_cpu_memory_info(a, &mut mem_info) })?;
    let status = unsafe {
        ffi::ort_create_tensor(
            a,
            mem_info,
            bytes.as_mut_ptr() as *mut c_void,
            bytes.len(),
            shape.as_ptr(),
            shape.len(),
            tensor.element_type().tag(),
            &mut out,
        )
    };
    unsafe { ffi::ort_release_memory_info(a, mem_info) };
    check_status(status)?;
    Ok(Feed {
        value: ValueGuard(out),
        _pinned: bytes,
    })
}

fn read_value(v: &ValueGuard) -> Result<Value> {
    let a = api();
    let mut onnx_type: c_int = 0;
    check_status(unsafe { ffi::ort_value_type(a, v.0, &mut onnx_type) })?;
    match onnx_type {
        ffi::ONNX_TYPE_TENSOR => Ok(Value::Tensor(read_tensor(v)?)),
        ffi::ONNX_TYPE_SEQUENCE => {
            let mut count = 0usize;
            check_status(unsafe { ffi::ort_value_count(a, v.0, &mut count) })?;
            let mut items = Vec::with_capacity(count);
            for i in 0..count {
                let item = get_element(v, i as c_int)?;
                items.push(read_value(&item)?);
            }
            Ok(Value::Sequence(items))
        }
        ffi::ONNX_TYPE_MAP => {
            let keys = read_tensor(&get_element(v, 0)?)?;
            let values = read_tensor(&get_element(v, 1)?)?;
            Ok(Value::Map(MapValue::new(keys, values)?))
        }
        other => Err(OrtError::engine(
            ErrorCode::NotImplemented,
            format!("unsupported ONNX value type {other}"),
        )),
    }
}

fn get_element(v: &ValueGuard, index: c_int) -> Result<ValueGuard> {
    let mut out: *mut ffi::OrtValue = ptr::null_mut();
    check_status(unsafe { ffi::ort_value_get(api(), v.0, index, &mut out) })?;
    Ok(ValueGuard(out))
}

fn read_tensor(v: &ValueGuard) -> Result<Tensor> {
    let a = api();
    let mut elem: c_int = 0;
    let mut ndim = 0usize;
    check_status(unsafe { ffi::ort_tensor_info(a, v.0, &mut elem, &mut ndim) })?;
    let mut shape = vec![0i64; ndim];
    if ndim > 0 {
        check_status(unsafe { ffi::ort_tensor_shape(a, v.0, shape.as_mut_ptr(), ndim) })?;
    }
    let elem = ElementType::from_tag(elem)?;
    elem.ensure_supported()?;
    let count = element_count(&shape).ok_or_else(|| OrtError::InvalidShape(shape.clone()))?;

    let Some(width) = elem.width() else {
        return Tensor::from_data(&shape, TensorData::String(read_strings(v, count)?));
    };
    if count == 0 {
        return Tensor::from_data(&shape, TensorData::empty(elem)?);
    }
    let mut data: *mut c_void = ptr::null_mut();
    check_status(unsafe { ffi::ort_tensor_data(a, v.0, &mut data) })?;
    let bytes = unsafe { std::slice::from_raw_parts(data as *const u8, count * width) };
    Tensor::from_le_bytes(elem, &shape, bytes)
}

fn read_strings(v: &ValueGuard, count: usize) -> Result<Vec<String>> {
    if count == 0 {
        return Ok(Vec::new());
    }
    let a = api();
    let mut total = 0usize;
    check_status(unsafe { ffi::ort_string_tensor_data_length(a, v.0, &mut total) })?;
    let mut buf = vec![0u8; total];
    let mut offsets = vec![0usize; count];
    check_status(unsafe {
        ffi::ort_string_tensor_content(
            a,
            v.0,
            buf.as_mut_ptr() as *mut c_void,
            total,
            offsets.as_mut_ptr(),
            count,
        )
    })?;
    let mut out = Vec::with_capacity(count);
    for (i, &start) in offsets.iter().enumerate() {
        let end = offsets.get(i + 1).copied().unwrap_or(total);
        out.push(String::from_utf8_lossy(&buf[start..end]).into_owned());
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

struct RunOptionsGuard(*mut ffi::OrtRunOptions);

impl Drop for RunOptionsGuard {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { ffi::ort_release_run_options(api(), self.0) };
        }
    }
}

/// Raw run options pointer handed to the terminate listener.
struct RunOptionsPtr(*mut ffi::OrtRunOptions);

unsafe impl Send for RunOptionsPtr {}
unsafe impl Sync for RunOptionsPtr {}

impl RunOptionsPtr {
    fn set_terminate(&self, terminate: bool) {
        let status = unsafe { ffi::ort_run_options_set_terminate(api(), self.0, terminate as c_int) };
        if let Err(e) = check_status(status) {
            warn!(error = %e, terminate, "failed to forward terminate flag");
        }
    }
}

struct NativeModel {
    session: *mut ffi::OrtSession,
    metadata: GraphMetadata,
    profiling: AtomicBool,
}

// ORT sessions are safe to Run concurrently.
unsafe impl Send for NativeModel {}
unsafe impl Sync for NativeModel {}

impl EngineModel for NativeModel {
    fn metadata(&self) -> &GraphMetadata {
        &self.metadata
    }

    fn run(
        &self,
        inputs: &[NamedValue],
        output_names: &[&str],
        run_options: &RunOptions,
    ) -> Result<Vec<Value>> {
        let a = api();

        let mut raw_ro: *mut ffi::OrtRunOptions = ptr::null_mut();
        check_status(unsafe { ffi::ort_create_run_options(a, &mut raw_ro) })?;
        let ro = RunOptionsGuard(raw_ro);
        let tag = c_string(run_options.log_id())?;
        check_status(unsafe { ffi::ort_run_options_set_tag(a, ro.0, tag.as_ptr()) })?;
        check_status(unsafe { ffi::ort_run_options_set_log_severity(a, ro.0, run_options.log_level() as c_int) })?;

        // Registration also pushes the current flag value. Dropped before
        // `ro`, so the listener never sees a released handle.
        let target = RunOptionsPtr(ro.0);
        let _watch = run_options.watch_terminate(Box::new(move |terminate| target.set_terminate(terminate)));

        let c_input_names = inputs.iter().map(|i| c_string(i.name())).collect::<Result<Vec<_>>>()?;
        let c_input_ptrs: Vec<*const c_char> = c_input_names.iter().map(|s| s.as_ptr()).collect();
        let feeds = inputs
            .iter()
            .map(|i| create_feed(i.name(), i.value()))
            .collect::<Result<Vec<_>>>()?;
        let c_inputs: Vec<*const ffi::OrtValue> = feeds.iter().map(|f| f.value.0 as *const _).collect();

        let c_output_names = output_names.iter().map(|n| c_string(n)).collect::<Result<Vec<_>>>()?;
        let c_output_ptrs: Vec<*const c_char> = c_output_names.iter().map(|s| s.as_ptr()).collect();
        let mut c_outputs: Vec<*mut ffi::OrtValue> = vec![ptr::null_mut(); output_names.len()];

        let status = unsafe {
            ffi::ort_run(
                a,
                self.session,
                ro.0,
                c_input_ptrs.as_ptr(),
                c_inputs.as_ptr(),
                c_inputs.len(),
                c_output_ptrs.as_ptr(),
                c_output_ptrs.len(),
                c_outputs.as_mut_ptr(),
            )
        };
        // Guard outputs before anything can return early.
        let outputs: Vec<ValueGuard> = c_outputs.into_iter().map(ValueGuard).collect();
        if let Err(e) = check_status(status) {
            if run_options.terminate() {
                return Err(OrtError::Terminated);
            }
            return Err(e);
        }
        outputs.iter().map(read_value).collect()
    }

    fn end_profiling(&self) -> Result<Option<PathBuf>> {
        if !self.profiling.swap(false, Ordering::SeqCst) {
            return Ok(None);
        }
        let mut out: *mut c_char = ptr::null_mut();
        check_status(unsafe { ffi::ort_end_profiling(api(), self.session, &mut out) })?;
        let path = unsafe { take_allocated(out) };
        Ok(Some(PathBuf::from(path)))
    }
}

impl Drop for NativeModel {
    fn drop(&mut self) {
        if !self.session.is_null() {
            unsafe { ffi::ort_release_session(api(), self.session) };
            self.session = ptr::null_mut();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Env;

    // Needs libonnxruntime and a model: ORT_TEST_MODEL=/path/to/squeezenet.onnx
    #[test]
    #[ignore]
    fn squeezenet_metadata_and_run() {
        let path = std::env::var("ORT_TEST_MODEL").unwrap();
        let env = Env::native("test").unwrap();
        let session = env.session_from_file(&path, &SessionOptions::new()).unwrap();

        let input = session.input_metadata().iter().next().map(|(n, m)| (n.to_string(), m.clone())).unwrap();
        let (name, meta) = input;
        assert_eq!(meta.element_type(), Some(ElementType::Float));
        let dims: Vec<i64> = meta.dimensions().iter().map(|&d| d.max(1)).collect();
        let n = element_count(&dims).unwrap();
        let feed = NamedValue::from_tensor(name, Tensor::new(&dims, vec![0.5f32; n]).unwrap());

        let out = session.run(&[feed]).unwrap();
        assert_eq!(out.len(), session.output_metadata().len());
    }

    #[test]
    #[ignore]
    fn env_is_shared() {
        let a = NativeEngine::new("one").unwrap();
        let b = NativeEngine::new("two").unwrap();
        assert_eq!(a.env.0, b.env.0);
    }
}
