use crate::{
    options::OptionError,
    registry::{CallOutput, FunctionEntry, FunctionError, Registry, ValueStream},
    status::Status,
    types::{InputValue, OutputValue, StreamMessage, Value},
};
use futures::FutureExt;
use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Buffered messages between the sequencing task and a slow consumer.
const STREAM_BUFFER: usize = 32;

/// Routes calls to registered functions: resolves the name, converts and
/// checks every argument, invokes the function with panics contained,
/// and encodes what comes back.
#[derive(Clone)]
pub struct Engine {
    registry: Arc<Registry>,
}

impl Engine {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Runs a unary function to completion.
    pub async fn run(&self, name: &str, inputs: &[InputValue]) -> Result<Vec<OutputValue>, Status> {
        let entry = self
            .registry
            .lookup(name)
            .ok_or_else(|| Status::not_found(name))?;
        if entry.signature.is_streaming() {
            return Err(Status::invalid_argument(format!(
                "function '{name}' streams its result and must be called through the streaming entry"
            )));
        }
        let args = self.convert_inputs(name, entry, inputs)?;
        debug!(function = name, "dispatching unary call");

        let result = match AssertUnwindSafe(entry.callable.invoke(args))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                warn!(function = name, "function panicked");
                return Err(Status::internal(format!(
                    "function '{name}' panicked: {}",
                    panic_message(panic)
                )));
            }
        };
        let output = result.map_err(|e| function_status(name, e))?;
        let CallOutput::Values(vals) = output else {
            return Err(Status::internal(format!(
                "function '{name}' produced a stream from the unary entry"
            )));
        };
        encode_outputs(name, entry, vals)
    }

    /// Starts a streaming function. Messages come back sequenced, and the
    /// final one is only marked once the producer's end is known, which
    /// costs one message of look-ahead.
    pub async fn stream(
        &self,
        name: &str,
        inputs: &[InputValue],
    ) -> Result<mpsc::Receiver<Result<StreamMessage, Status>>, Status> {
        let entry = self
            .registry
            .lookup(name)
            .ok_or_else(|| Status::not_found(name))?;
        if !entry.signature.is_streaming() {
            return Err(Status::invalid_argument(format!(
                "function '{name}' returns inline values and must be called through the unary entry"
            )));
        }
        let args = self.convert_inputs(name, entry, inputs)?;
        debug!(function = name, "dispatching streaming call");

        let result = match AssertUnwindSafe(entry.callable.invoke(args))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                warn!(function = name, "function panicked");
                return Err(Status::internal(format!(
                    "function '{name}' panicked: {}",
                    panic_message(panic)
                )));
            }
        };
        let output = result.map_err(|e| function_status(name, e))?;
        let CallOutput::Stream(chunks) = output else {
            return Err(Status::internal(format!(
                "function '{name}' produced inline values from the streaming entry"
            )));
        };

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(drain_stream(name.to_owned(), chunks, tx));
        Ok(rx)
    }

    /// Decodes and option-resolves the supplied inputs against the
    /// declared parameters, positionally. Surplus inputs are refused;
    /// missing ones decode to their kind's zero value.
    fn convert_inputs(
        &self,
        name: &str,
        entry: &FunctionEntry,
        inputs: &[InputValue],
    ) -> Result<Vec<Value>, Status> {
        let declared = &entry.signature.inputs;
        if inputs.len() > declared.len() {
            return Err(Status::invalid_argument(format!(
                "function '{name}' takes {} inputs, got {}",
                declared.len(),
                inputs.len()
            )));
        }
        declared
            .iter()
            .enumerate()
            .map(|(i, param)| {
                let supplied = inputs.get(i).and_then(|iv| iv.value.as_deref());
                let mut val = param.kind.decode(supplied).map_err(|e| {
                    Status::invalid_argument(format!(
                        "input '{}' of function '{name}': {e}",
                        param.name
                    ))
                })?;
                if !param.options.is_empty() {
                    val = match self.registry.options().resolve(name, &param.name, val) {
                        Ok(v) => v,
                        Err(e @ OptionError::Unregistered { .. }) => {
                            return Err(Status::internal(e.to_string()));
                        }
                        Err(OptionError::Rejected(msg)) => {
                            return Err(Status::invalid_argument(format!(
                                "input '{}' of function '{name}': {msg}",
                                param.name
                            )));
                        }
                    };
                }
                Ok(val)
            })
            .collect()
    }
}

/// Forwards producer chunks as sequenced messages. Each chunk is held
/// back until the producer yields the next one or hangs up; only then is
/// it known whether the held chunk was the last.
async fn drain_stream(
    name: String,
    mut chunks: ValueStream,
    tx: mpsc::Sender<Result<StreamMessage, Status>>,
) {
    let mut seq: u64 = 0;
    let mut pending: Option<String> = None;
    loop {
        match chunks.recv().await {
            Some(Ok(chunk)) => {
                if let Some(prev) = pending.replace(chunk) {
                    let msg = StreamMessage {
                        seq,
                        is_final: false,
                        value: prev,
                    };
                    seq += 1;
                    if tx.send(Ok(msg)).await.is_err() {
                        return; // consumer hung up
                    }
                }
            }
            Some(Err(e)) => {
                // The failure supersedes whatever was held back.
                warn!(function = %name, "stream producer failed");
                _ = tx.send(Err(function_status(&name, e))).await;
                return;
            }
            None => {
                // Producer closed. The held chunk is the last message; a
                // producer that never sent anything yields an empty final.
                let value = pending.take().unwrap_or_default();
                _ = tx
                    .send(Ok(StreamMessage {
                        seq,
                        is_final: true,
                        value,
                    }))
                    .await;
                return;
            }
        }
    }
}

/// Pairs returned values with the declared outputs and encodes each one.
/// A mismatch here means the function broke its registration contract.
fn encode_outputs(
    name: &str,
    entry: &FunctionEntry,
    vals: Vec<Value>,
) -> Result<Vec<OutputValue>, Status> {
    let declared = &entry.signature.outputs;
    if vals.len() != declared.len() {
        return Err(Status::internal(format!(
            "function '{name}' returned {} values where its signature declares {}",
            vals.len(),
            declared.len()
        )));
    }
    declared
        .iter()
        .zip(vals)
        .map(|(param, val)| {
            let value = param.kind.encode(&val).map_err(|e| {
                Status::internal(format!("output '{}' of function '{name}': {e}", param.name))
            })?;
            Ok(OutputValue {
                name: param.name.clone(),
                kind: param.kind,
                value,
            })
        })
        .collect()
}

fn function_status(name: &str, err: FunctionError) -> Status {
    match err {
        FunctionError::Failed(msg) => Status::internal(format!("function '{name}' failed: {msg}")),
        FunctionError::Unavailable(msg) => {
            Status::unavailable(format!("function '{name}': {msg}"))
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        options::one_of,
        registry::{streaming, unary},
        status::Code,
        types::{Kind, Signature},
    };

    fn engine_with(build: impl FnOnce(&mut Registry)) -> Engine {
        let mut reg = Registry::new();
        build(&mut reg);
        Engine::new(Arc::new(reg))
    }

    fn register_concat(reg: &mut Registry) {
        let sig = Signature::new()
            .input("a", Kind::Text)
            .input("b", Kind::Text)
            .input("separator", Kind::Text)
            .output("result", Kind::Text);
        reg.register(
            "Concat",
            sig,
            unary(|(a, b, sep): (String, String, String)| async move {
                Ok((format!("{a}{sep}{b}"),))
            }),
        )
        .unwrap();
    }

    fn register_splitter(reg: &mut Registry) {
        let sig = Signature::new()
            .input("text", Kind::Text)
            .input("separator", Kind::Text)
            .output("chunks", Kind::Stream);
        reg.register(
            "Split",
            sig,
            streaming(|(text, sep): (String, String)| async move {
                let (tx, rx) = mpsc::channel(16);
                tokio::spawn(async move {
                    for part in text.split(sep.as_str()).filter(|p| !p.is_empty()) {
                        if tx.send(Ok(part.to_owned())).await.is_err() {
                            return;
                        }
                    }
                });
                Ok(rx)
            }),
        )
        .unwrap();
    }

    async fn collect(
        mut rx: mpsc::Receiver<Result<StreamMessage, Status>>,
    ) -> Vec<Result<StreamMessage, Status>> {
        let mut out = Vec::new();
        while let Some(item) = rx.recv().await {
            out.push(item);
        }
        out
    }

    fn msg(seq: u64, is_final: bool, value: &str) -> StreamMessage {
        StreamMessage {
            seq,
            is_final,
            value: value.to_owned(),
        }
    }

    #[tokio::test]
    async fn concat_runs_end_to_end() {
        let engine = engine_with(register_concat);
        let outputs = engine
            .run(
                "Concat",
                &[
                    InputValue::new("a", "Hello"),
                    InputValue::new("b", "world"),
                    InputValue::new("separator", ", "),
                ],
            )
            .await
            .unwrap();
        assert_eq!(
            outputs,
            vec![OutputValue {
                name: "result".into(),
                kind: Kind::Text,
                value: "Hello, world".into()
            }]
        );
    }

    #[tokio::test]
    async fn unknown_function_is_not_found() {
        let engine = engine_with(|_| {});
        let err = engine.run("Nope", &[]).await.unwrap_err();
        assert_eq!(err.code, Code::NotFound);
        assert!(err.message.contains("Nope"));
    }

    #[tokio::test]
    async fn undecodable_input_names_everything() {
        let engine = engine_with(|reg| {
            let sig = Signature::new()
                .input("count", Kind::Int)
                .output("count", Kind::Int);
            reg.register("Id", sig, unary(|(n,): (i64,)| async move { Ok((n,)) }))
                .unwrap();
        });
        let err = engine
            .run("Id", &[InputValue::new("count", "five")])
            .await
            .unwrap_err();
        assert_eq!(err.code, Code::InvalidArgument);
        assert!(err.message.contains("count"));
        assert!(err.message.contains("Id"));
        assert!(err.message.contains("int"));
        assert!(err.message.contains("five"));
    }

    #[tokio::test]
    async fn missing_inputs_decode_to_zero_values() {
        let engine = engine_with(register_concat);

        // Third input absent by marker, and entirely unsupplied.
        for inputs in [
            vec![
                InputValue::new("a", "x"),
                InputValue::new("b", "y"),
                InputValue::absent("separator"),
            ],
            vec![InputValue::new("a", "x"), InputValue::new("b", "y")],
        ] {
            let outputs = engine.run("Concat", &inputs).await.unwrap();
            assert_eq!(outputs[0].value, "xy");
        }
    }

    #[tokio::test]
    async fn surplus_inputs_are_refused() {
        let engine = engine_with(register_concat);
        let inputs = vec![
            InputValue::new("a", "1"),
            InputValue::new("b", "2"),
            InputValue::new("separator", "-"),
            InputValue::new("extra", "3"),
        ];
        let err = engine.run("Concat", &inputs).await.unwrap_err();
        assert_eq!(err.code, Code::InvalidArgument);
        assert!(err.message.contains("takes 3 inputs, got 4"));
    }

    #[tokio::test]
    async fn call_shape_must_match_the_entry() {
        let engine = engine_with(|reg| {
            register_concat(reg);
            register_splitter(reg);
        });

        let err = engine.run("Split", &[]).await.unwrap_err();
        assert_eq!(err.code, Code::InvalidArgument);
        assert!(err.message.contains("streaming"));

        let err = engine.stream("Concat", &[]).await.unwrap_err();
        assert_eq!(err.code, Code::InvalidArgument);
        assert!(err.message.contains("unary"));
    }

    #[tokio::test]
    async fn function_failure_maps_to_internal() {
        let engine = engine_with(|reg| {
            let sig = Signature::new().output("out", Kind::Text);
            reg.register(
                "Broken",
                sig,
                unary(|_: ()| async move {
                    Err::<(String,), _>(FunctionError::failed("upstream said no"))
                }),
            )
            .unwrap();
        });
        let err = engine.run("Broken", &[]).await.unwrap_err();
        assert_eq!(err.code, Code::Internal);
        assert!(err.message.contains("Broken"));
        assert!(err.message.contains("upstream said no"));
    }

    #[tokio::test]
    async fn unavailable_passes_through_as_retryable() {
        let engine = engine_with(|reg| {
            let sig = Signature::new().output("out", Kind::Text);
            reg.register(
                "Flaky",
                sig,
                unary(|_: ()| async move {
                    Err::<(String,), _>(FunctionError::unavailable("backend down"))
                }),
            )
            .unwrap();
        });
        let err = engine.run("Flaky", &[]).await.unwrap_err();
        assert_eq!(err.code, Code::Unavailable);
    }

    #[tokio::test]
    async fn panics_are_contained_and_the_engine_survives() {
        let engine = engine_with(|reg| {
            register_concat(reg);
            let sig = Signature::new().output("out", Kind::Text);
            reg.register(
                "Panics",
                sig,
                unary(|_: ()| async move {
                    let empty: Vec<i64> = Vec::new();
                    Ok::<_, FunctionError>((empty[3].to_string(),))
                }),
            )
            .unwrap();
        });

        let err = engine.run("Panics", &[]).await.unwrap_err();
        assert_eq!(err.code, Code::Internal);
        assert!(err.message.contains("panicked"));
        assert!(err.message.contains("index out of bounds"));

        // The engine keeps serving after a contained panic.
        let outputs = engine
            .run(
                "Concat",
                &[InputValue::new("a", "still"), InputValue::new("b", "alive")],
            )
            .await
            .unwrap();
        assert_eq!(outputs[0].value, "stillalive");
    }

    #[tokio::test]
    async fn option_values_resolve_to_canonical_form() {
        let engine = engine_with(|reg| {
            reg.options_mut()
                .insert("Echo", "mode", one_of(["fast", "slow"]));
            let sig = Signature::new()
                .input_with_options("mode", Kind::Text, ["fast", "slow"])
                .output("mode", Kind::Text);
            reg.register("Echo", sig, unary(|(m,): (String,)| async move { Ok((m,)) }))
                .unwrap();
        });

        let outputs = engine
            .run("Echo", &[InputValue::new("mode", "FAST")])
            .await
            .unwrap();
        assert_eq!(outputs[0].value, "fast");

        let err = engine
            .run("Echo", &[InputValue::new("mode", "turbo")])
            .await
            .unwrap_err();
        assert_eq!(err.code, Code::InvalidArgument);
        assert!(err.message.contains("turbo"));
    }

    #[tokio::test]
    async fn declared_options_without_resolver_is_internal() {
        let engine = engine_with(|reg| {
            let sig = Signature::new()
                .input_with_options("mode", Kind::Text, ["fast", "slow"])
                .output("mode", Kind::Text);
            reg.register("Echo", sig, unary(|(m,): (String,)| async move { Ok((m,)) }))
                .unwrap();
        });

        let err = engine
            .run("Echo", &[InputValue::new("mode", "fast")])
            .await
            .unwrap_err();
        assert_eq!(err.code, Code::Internal);
    }

    #[tokio::test]
    async fn stream_marks_only_the_last_message_final() {
        let engine = engine_with(register_splitter);
        let rx = engine
            .stream(
                "Split",
                &[
                    InputValue::new("text", "a b c"),
                    InputValue::new("separator", " "),
                ],
            )
            .await
            .unwrap();
        let messages: Vec<_> = collect(rx).await.into_iter().map(Result::unwrap).collect();
        assert_eq!(
            messages,
            vec![msg(0, false, "a"), msg(1, false, "b"), msg(2, true, "c")]
        );
    }

    #[tokio::test]
    async fn single_chunk_stream_is_final_immediately() {
        let engine = engine_with(register_splitter);
        let rx = engine
            .stream(
                "Split",
                &[
                    InputValue::new("text", "only"),
                    InputValue::new("separator", " "),
                ],
            )
            .await
            .unwrap();
        let messages: Vec<_> = collect(rx).await.into_iter().map(Result::unwrap).collect();
        assert_eq!(messages, vec![msg(0, true, "only")]);
    }

    #[tokio::test]
    async fn long_streams_stay_gapless_with_one_final() {
        // Well past the drain buffer, so sequencing survives backpressure.
        let engine = engine_with(register_splitter);
        let text = (0..200).map(|i| i.to_string()).collect::<Vec<_>>().join(" ");
        let rx = engine
            .stream(
                "Split",
                &[
                    InputValue::new("text", text),
                    InputValue::new("separator", " "),
                ],
            )
            .await
            .unwrap();
        let messages: Vec<_> = collect(rx).await.into_iter().map(Result::unwrap).collect();

        assert_eq!(messages.len(), 200);
        for (i, m) in messages.iter().enumerate() {
            assert_eq!(m.seq, i as u64);
            assert_eq!(m.is_final, i == 199);
            assert_eq!(m.value, i.to_string());
        }
    }

    #[tokio::test]
    async fn empty_stream_yields_one_empty_final() {
        let engine = engine_with(|reg| {
            let sig = Signature::new().output("chunks", Kind::Stream);
            reg.register(
                "Silence",
                sig,
                streaming(|_: ()| async move {
                    let (tx, rx) = mpsc::channel(1);
                    drop(tx);
                    Ok(rx)
                }),
            )
            .unwrap();
        });
        let rx = engine.stream("Silence", &[]).await.unwrap();
        let messages: Vec<_> = collect(rx).await.into_iter().map(Result::unwrap).collect();
        assert_eq!(messages, vec![msg(0, true, "")]);
    }

    #[tokio::test]
    async fn mid_stream_failure_ends_with_an_error() {
        let engine = engine_with(|reg| {
            let sig = Signature::new().output("chunks", Kind::Stream);
            reg.register(
                "Dies",
                sig,
                streaming(|_: ()| async move {
                    let (tx, rx) = mpsc::channel(4);
                    tokio::spawn(async move {
                        _ = tx.send(Ok("first".to_owned())).await;
                        _ = tx.send(Err(FunctionError::failed("source dried up"))).await;
                    });
                    Ok(rx)
                }),
            )
            .unwrap();
        });

        let rx = engine.stream("Dies", &[]).await.unwrap();
        let items = collect(rx).await;
        // The held-back chunk is superseded by the failure.
        assert_eq!(items.len(), 1);
        let err = items[0].clone().unwrap_err();
        assert_eq!(err.code, Code::Internal);
        assert!(err.message.contains("source dried up"));
    }

    #[tokio::test]
    async fn streaming_setup_failure_is_reported_inline() {
        let engine = engine_with(|reg| {
            let sig = Signature::new().output("chunks", Kind::Stream);
            reg.register(
                "NeverStarts",
                sig,
                streaming(|_: ()| async move {
                    Err::<ValueStream, _>(FunctionError::unavailable("no capacity"))
                }),
            )
            .unwrap();
        });
        let err = engine.stream("NeverStarts", &[]).await.unwrap_err();
        assert_eq!(err.code, Code::Unavailable);
    }
}
