//! JavaScript function modules evaluated with the boa engine.
//!
//! A function file is an ES module whose default export is the function:
//!
//! ```js
//! export default async function (args, context) {
//!   context.response.setHeader("cache-control", "no-store");
//!   return { greeting: `hello ${args.name}`, at: new Date() };
//! }
//! ```
//!
//! Engine contexts are not `Send`, so every loaded module gets a worker
//! thread that owns its context. The module's top-level code runs once, when
//! the worker starts; calls are queued to the worker over a channel and run
//! one at a time against the same module instance.

use super::bridge::{from_bridge_json, to_bridge_json, BRIDGE_PRELUDE};
use super::ModuleLoader;
use crate::codec::WireValue;
use crate::error::{InvocationError, LoadError};
use crate::function::{BackendFunction, Export, InvocationContext, ResponseHandle};
use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue};
use boa_engine::builtins::promise::PromiseState;
use boa_engine::module::SimpleModuleLoader;
use boa_engine::object::builtins::JsPromise;
use boa_engine::{js_string, Context, JsObject, JsString, JsValue, Module, Source};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::{Arc, RwLock};
use std::thread;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Module loader for `.js` function files under a source root.
pub struct ScriptModuleLoader {
    root: PathBuf,
    /// Cached default exports, keyed by module path.
    modules: Arc<RwLock<HashMap<PathBuf, Export>>>,
}

impl ScriptModuleLoader {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            modules: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of cached modules.
    pub fn cached(&self) -> usize {
        self.modules.read().map(|m| m.len()).unwrap_or(0)
    }

    fn cached_export(&self, path: &Path) -> Option<Export> {
        self.modules
            .read()
            .ok()
            .and_then(|modules| modules.get(path).cloned())
    }
}

#[async_trait]
impl ModuleLoader for ScriptModuleLoader {
    /// Dropping the cached export lets the module's worker stop once no
    /// call holds it any more.
    fn invalidate(&self, path: &Path) -> bool {
        let mut modules = self.modules.write().unwrap_or_else(|e| e.into_inner());
        modules.remove(path).is_some()
    }

    async fn load(&self, path: &Path) -> Result<Export, LoadError> {
        if let Some(export) = self.cached_export(path) {
            return Ok(export);
        }

        let source = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LoadError::NotFound(path.to_path_buf())
            } else {
                LoadError::Read {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                }
            }
        })?;

        let evaluate_error = |message: String| LoadError::Evaluate {
            path: path.to_path_buf(),
            message,
        };

        let (ready_tx, ready_rx) = oneshot::channel();
        let (commands, receiver) = mpsc::unbounded_channel();
        let worker = ModuleWorker {
            root: self.root.clone(),
            path: path.to_path_buf(),
            source,
        };
        thread::Builder::new()
            .name("abledev-module".to_string())
            .spawn(move || worker.run(ready_tx, receiver))
            .map_err(|e| evaluate_error(format!("failed to start module worker: {}", e)))?;

        let shape = ready_rx
            .await
            .map_err(|_| evaluate_error("module worker stopped during evaluation".to_string()))?
            .map_err(evaluate_error)?;

        let export = match shape {
            DefaultExport::Callable => Export::function(ScriptFunction {
                path: path.to_path_buf(),
                commands,
            }),
            DefaultExport::Value(value) => Export::Value(value),
        };

        debug!("Loaded module {}", path.display());
        self.modules
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_path_buf(), export.clone());
        Ok(export)
    }
}

enum DefaultExport {
    Callable,
    Value(WireValue),
}

/// One queued call: bridge JSON text for the arguments and the context.
struct CallRequest {
    args: String,
    context: String,
    reply: oneshot::Sender<Result<ScriptOutcome, InvocationError>>,
}

/// What `__abledev_invoke` settles with.
#[derive(Debug, Deserialize)]
struct ScriptOutcome {
    value: JsonValue,
    #[serde(default)]
    headers: Vec<(HeaderOp, String, String)>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum HeaderOp {
    Set,
    Append,
}

impl ScriptOutcome {
    fn apply_headers(&self, response: &ResponseHandle) -> Result<(), InvocationError> {
        for (op, name, value) in &self.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| InvocationError::failed(format!("invalid header name '{}': {}", name, e)))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| InvocationError::failed(format!("invalid value for header '{}': {}", name, e)))?;
            match op {
                HeaderOp::Set => response.insert_header(header_name, header_value),
                HeaderOp::Append => response.append_header(header_name, header_value),
            }
        }
        Ok(())
    }
}

/// Owns one module's engine on a dedicated thread.
struct ModuleWorker {
    root: PathBuf,
    path: PathBuf,
    source: String,
}

impl ModuleWorker {
    fn run(
        self,
        ready: oneshot::Sender<Result<DefaultExport, String>>,
        mut calls: mpsc::UnboundedReceiver<CallRequest>,
    ) {
        let prepared = Engine::evaluate(&self.root, &self.path, &self.source)
            .and_then(|mut engine| engine.default_export().map(|default| (engine, default)));
        let (mut engine, function) = match prepared {
            Ok(prepared) => prepared,
            Err(message) => {
                let _ = ready.send(Err(message));
                return;
            }
        };

        if !function.is_callable() {
            let value = engine
                .call_global("__abledev_encode", &[function])
                .and_then(|encoded| engine.settled_text(encoded))
                .and_then(|text| parse_bridge_text(&text).map_err(|e| e.to_string()));
            let _ = ready.send(value.map(DefaultExport::Value));
            return;
        }
        if ready.send(Ok(DefaultExport::Callable)).is_err() {
            return;
        }

        while let Some(CallRequest {
            args,
            context,
            reply,
        }) = calls.blocking_recv()
        {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                engine.invoke(&function, &args, &context)
            }))
            .unwrap_or_else(|_| {
                Err(InvocationError::Panicked(format!(
                    "script engine panicked in {}",
                    self.path.display()
                )))
            });
            let _ = reply.send(outcome);
        }
        debug!("Module worker for {} stopped", self.path.display());
    }
}

/// A function exported by a script module. Clones share the module worker.
#[derive(Clone)]
pub struct ScriptFunction {
    path: PathBuf,
    commands: mpsc::UnboundedSender<CallRequest>,
}

impl ScriptFunction {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl BackendFunction for ScriptFunction {
    async fn call(
        &self,
        args: WireValue,
        context: InvocationContext,
    ) -> Result<WireValue, InvocationError> {
        let (reply, outcome) = oneshot::channel();
        let request = CallRequest {
            args: to_bridge_json(&args).to_string(),
            context: to_bridge_json(&context.to_wire()).to_string(),
            reply,
        };
        if self.commands.send(request).is_err() {
            warn!("Module worker for {} is gone", self.path.display());
            return Err(InvocationError::Join(format!(
                "module worker for {} is not running",
                self.path.display()
            )));
        }

        let outcome = outcome.await.map_err(|_| {
            InvocationError::Join(format!(
                "module worker for {} stopped mid-call",
                self.path.display()
            ))
        })??;
        outcome.apply_headers(&context.response)?;
        Ok(from_bridge_json(outcome.value)?)
    }
}

fn parse_bridge_text(text: &str) -> Result<WireValue, crate::error::CodecError> {
    from_bridge_json(serde_json::from_str(text)?)
}

/// An engine context with the bridge prelude and one evaluated module.
struct Engine {
    context: Context,
    namespace: JsObject,
}

impl Engine {
    fn evaluate(root: &Path, path: &Path, source: &str) -> Result<Self, String> {
        let loader = SimpleModuleLoader::new(root).map_err(|e| e.to_string())?;
        let mut context = Context::builder()
            .module_loader(Rc::new(loader))
            .build()
            .map_err(|e| e.to_string())?;

        context
            .eval(Source::from_bytes(BRIDGE_PRELUDE))
            .map_err(|e| e.to_string())?;

        let module_path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let module = Module::parse(
            Source::from_bytes(source.as_bytes()).with_path(&module_path),
            None,
            &mut context,
        )
        .map_err(|e| e.to_string())?;

        let evaluated = module.load_link_evaluate(&mut context);
        context.run_jobs().map_err(|e| e.to_string())?;
        match evaluated.state() {
            PromiseState::Fulfilled(_) => {}
            PromiseState::Rejected(error) => return Err(error.display().to_string()),
            PromiseState::Pending => {
                return Err("module evaluation did not complete".to_string());
            }
        }

        let namespace = module.namespace(&mut context);
        debug!("Evaluated module {}", path.display());
        Ok(Self { context, namespace })
    }

    fn default_export(&mut self) -> Result<JsValue, String> {
        self.namespace
            .get(js_string!("default"), &mut self.context)
            .map_err(|e| e.to_string())
    }

    fn invoke(
        &mut self,
        function: &JsValue,
        args: &str,
        context: &str,
    ) -> Result<ScriptOutcome, InvocationError> {
        let promise = self
            .call_global(
                "__abledev_invoke",
                &[
                    function.clone(),
                    JsValue::from(JsString::from(args)),
                    JsValue::from(JsString::from(context)),
                ],
            )
            .map_err(InvocationError::Script)?;

        let text = self.settled_text(promise).map_err(InvocationError::Script)?;
        serde_json::from_str(&text)
            .map_err(|e| InvocationError::failed(format!("malformed bridge result: {}", e)))
    }

    fn call_global(&mut self, name: &str, args: &[JsValue]) -> Result<JsValue, String> {
        let global = self.context.global_object();
        let function = global
            .get(JsString::from(name), &mut self.context)
            .map_err(|e| e.to_string())?;
        let function = function
            .as_callable()
            .map(|f| f.clone())
            .ok_or_else(|| format!("{} is not installed", name))?;
        function
            .call(&JsValue::undefined(), args, &mut self.context)
            .map_err(|e| e.to_string())
    }

    /// Drain the job queue and read the string a bridge call settled with.
    ///
    /// Plain strings pass through. A promise still pending once the queue is
    /// empty can never settle, since no timers exist in the context.
    fn settled_text(&mut self, value: JsValue) -> Result<String, String> {
        let promise = value
            .as_object()
            .map(|o| o.clone())
            .and_then(|object| JsPromise::from_object(object).ok());
        let settled = match promise {
            Some(promise) => {
                self.context.run_jobs().map_err(|e| e.to_string())?;
                match promise.state() {
                    PromiseState::Fulfilled(result) => result,
                    PromiseState::Rejected(reason) => {
                        return Err(reason
                            .as_string()
                            .map(|s| s.to_std_string_escaped())
                            .unwrap_or_else(|| reason.display().to_string()));
                    }
                    PromiseState::Pending => {
                        return Err("function returned a promise that never settles".to_string());
                    }
                }
            }
            _ => value,
        };

        settled
            .as_string()
            .map(|s| s.to_std_string_escaped())
            .ok_or_else(|| "bridge returned a non-string value".to_string())
    }
}
