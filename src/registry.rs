use crate::{
    options::OptionTable,
    types::{CodecError, FromValue, IntoValue, Kind, Parameter, Signature, Value},
};
use futures::future::BoxFuture;
use std::{
    collections::{BTreeMap, BTreeSet},
    future::Future,
    marker::PhantomData,
    sync::Arc,
};
use thiserror::Error;
use tokio::sync::mpsc;

/// How a registered function reports its own failures. Bad arguments and
/// shape mismatches never reach the function; these cover what goes
/// wrong inside it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FunctionError {
    #[error("{0}")]
    Failed(String),
    /// A dependency is temporarily unreachable; the caller may retry.
    #[error("{0}")]
    Unavailable(String),
}

impl FunctionError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

/// The producer half of a streamed result: already-encoded chunks, or a
/// failure that ends the stream.
pub type ValueStream = mpsc::Receiver<Result<String, FunctionError>>;

/// What one invocation yields.
#[derive(Debug)]
pub enum CallOutput {
    Values(Vec<Value>),
    Stream(ValueStream),
}

/// Object-safe shape every registered function is stored as. The kind
/// lists are the implementation's own contract; registration checks the
/// declared signature against them.
pub trait Callable: Send + Sync + 'static {
    fn input_kinds(&self) -> Vec<Kind>;
    fn output_kinds(&self) -> Vec<Kind>;
    fn invoke(&self, args: Vec<Value>) -> BoxFuture<'static, Result<CallOutput, FunctionError>>;
}

pub trait FromValues: Sized {
    fn kinds() -> Vec<Kind>;
    fn from_values(vals: Vec<Value>) -> Result<Self, CodecError>;
}

pub trait IntoValues {
    fn kinds() -> Vec<Kind>;
    fn into_values(self) -> Vec<Value>;
}

macro_rules! impl_tuple_values {
    ($($t:ident),*) => {
        impl<$($t: FromValue),*> FromValues for ($($t,)*) {
            fn kinds() -> Vec<Kind> {
                vec![$(<$t as FromValue>::kind()),*]
            }

            #[allow(unused_mut, unused_variables)]
            fn from_values(vals: Vec<Value>) -> Result<Self, CodecError> {
                let expected = <Self as FromValues>::kinds().len();
                if vals.len() != expected {
                    return Err(CodecError::Arity { expected, found: vals.len() });
                }
                let mut vals = vals.into_iter();
                Ok(($(
                    match vals.next() {
                        Some(val) => <$t as FromValue>::from_value(val)?,
                        None => return Err(CodecError::Arity { expected, found: 0 }),
                    },
                )*))
            }
        }

        impl<$($t: IntoValue),*> IntoValues for ($($t,)*) {
            fn kinds() -> Vec<Kind> {
                vec![$(<$t as IntoValue>::kind()),*]
            }

            #[allow(non_snake_case)]
            fn into_values(self) -> Vec<Value> {
                let ($($t,)*) = self;
                vec![$($t.into_value()),*]
            }
        }
    };
}

impl_tuple_values!();
impl_tuple_values!(A);
impl_tuple_values!(A, B);
impl_tuple_values!(A, B, C);
impl_tuple_values!(A, B, C, D);
impl_tuple_values!(A, B, C, D, E);
impl_tuple_values!(A, B, C, D, E, G);
impl_tuple_values!(A, B, C, D, E, G, H);
impl_tuple_values!(A, B, C, D, E, G, H, I);

/// Adapts a typed async closure into a [`Callable`]. The closure takes
/// its arguments as one tuple and returns a tuple of outputs.
pub struct UnaryFn<F, Args, Out> {
    f: F,
    _marker: PhantomData<fn(Args) -> Out>,
}

pub fn unary<F, Fut, Args, Out>(f: F) -> UnaryFn<F, Args, Out>
where
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Out, FunctionError>> + Send + 'static,
    Args: FromValues + 'static,
    Out: IntoValues + 'static,
{
    UnaryFn {
        f,
        _marker: PhantomData,
    }
}

impl<F, Fut, Args, Out> Callable for UnaryFn<F, Args, Out>
where
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Out, FunctionError>> + Send + 'static,
    Args: FromValues + 'static,
    Out: IntoValues + 'static,
{
    fn input_kinds(&self) -> Vec<Kind> {
        <Args as FromValues>::kinds()
    }

    fn output_kinds(&self) -> Vec<Kind> {
        <Out as IntoValues>::kinds()
    }

    fn invoke(&self, args: Vec<Value>) -> BoxFuture<'static, Result<CallOutput, FunctionError>> {
        let args = match Args::from_values(args) {
            Ok(args) => args,
            Err(e) => {
                let err = FunctionError::failed(format!("argument contract violated: {e}"));
                return Box::pin(async move { Err(err) });
            }
        };
        let fut = (self.f)(args);
        Box::pin(async move { fut.await.map(|out| CallOutput::Values(out.into_values())) })
    }
}

/// Adapts a typed async closure producing a channel of encoded chunks.
/// Its single declared output is the stream itself.
pub struct StreamingFn<F, Args> {
    f: F,
    _marker: PhantomData<fn(Args)>,
}

pub fn streaming<F, Fut, Args>(f: F) -> StreamingFn<F, Args>
where
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ValueStream, FunctionError>> + Send + 'static,
    Args: FromValues + 'static,
{
    StreamingFn {
        f,
        _marker: PhantomData,
    }
}

impl<F, Fut, Args> Callable for StreamingFn<F, Args>
where
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ValueStream, FunctionError>> + Send + 'static,
    Args: FromValues + 'static,
{
    fn input_kinds(&self) -> Vec<Kind> {
        <Args as FromValues>::kinds()
    }

    fn output_kinds(&self) -> Vec<Kind> {
        vec![Kind::Stream]
    }

    fn invoke(&self, args: Vec<Value>) -> BoxFuture<'static, Result<CallOutput, FunctionError>> {
        let args = match Args::from_values(args) {
            Ok(args) => args,
            Err(e) => {
                let err = FunctionError::failed(format!("argument contract violated: {e}"));
                return Box::pin(async move { Err(err) });
            }
        };
        let fut = (self.f)(args);
        Box::pin(async move { fut.await.map(CallOutput::Stream) })
    }
}

pub struct FunctionEntry {
    pub signature: Signature,
    pub callable: Arc<dyn Callable>,
}

/// Every function the service can dispatch, keyed by name. Signature and
/// implementation live in one entry, so a name can never resolve to a
/// description without a body or the other way around.
#[derive(Default)]
pub struct Registry {
    functions: BTreeMap<String, FunctionEntry>,
    options: OptionTable,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits a function after checking the declared signature against
    /// the implementation's contract. Rejections here are registrant
    /// bugs, surfaced before the server ever listens.
    pub fn register<C>(
        &mut self,
        name: impl Into<String>,
        signature: Signature,
        callable: C,
    ) -> Result<(), RegistryError>
    where
        C: Callable,
    {
        let name = name.into();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.functions.contains_key(&name) {
            return Err(RegistryError::Duplicate { function: name });
        }
        for params in [&signature.inputs, &signature.outputs] {
            if let Some(parameter) = duplicate_name(params) {
                return Err(RegistryError::DuplicateParameter {
                    function: name,
                    parameter,
                });
            }
        }
        if let Some(p) = signature.inputs.iter().find(|p| p.kind == Kind::Stream) {
            return Err(RegistryError::StreamInput {
                function: name,
                parameter: p.name.clone(),
            });
        }
        if signature.outputs.iter().any(|p| p.kind == Kind::Stream) && !signature.is_streaming() {
            return Err(RegistryError::StreamShape { function: name });
        }
        let declared: Vec<Kind> = signature.inputs.iter().map(|p| p.kind).collect();
        let actual = callable.input_kinds();
        if declared != actual {
            return Err(RegistryError::InputContract {
                function: name,
                declared,
                actual,
            });
        }
        let declared: Vec<Kind> = signature.outputs.iter().map(|p| p.kind).collect();
        let actual = callable.output_kinds();
        if declared != actual {
            return Err(RegistryError::OutputContract {
                function: name,
                declared,
                actual,
            });
        }
        self.functions.insert(
            name,
            FunctionEntry {
                signature,
                callable: Arc::new(callable),
            },
        );
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<&FunctionEntry> {
        self.functions.get(name)
    }

    /// Every registered name with its full signature, for discovery.
    pub fn signatures(&self) -> BTreeMap<String, Signature> {
        self.functions
            .iter()
            .map(|(name, entry)| (name.clone(), entry.signature.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn options(&self) -> &OptionTable {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut OptionTable {
        &mut self.options
    }
}

fn duplicate_name(params: &[Parameter]) -> Option<String> {
    let mut seen = BTreeSet::new();
    params
        .iter()
        .find_map(|p| (!seen.insert(p.name.as_str())).then(|| p.name.clone()))
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("function name cannot be empty")]
    EmptyName,
    #[error("function '{function}' is already registered")]
    Duplicate { function: String },
    #[error("function '{function}' declares parameter '{parameter}' twice")]
    DuplicateParameter { function: String, parameter: String },
    #[error("input '{parameter}' of function '{function}' cannot be a stream")]
    StreamInput { function: String, parameter: String },
    #[error("function '{function}' declares a stream output alongside other outputs")]
    StreamShape { function: String },
    #[error("function '{function}' declares inputs {declared:?} but its implementation takes {actual:?}")]
    InputContract {
        function: String,
        declared: Vec<Kind>,
        actual: Vec<Kind>,
    },
    #[error("function '{function}' declares outputs {declared:?} but its implementation returns {actual:?}")]
    OutputContract {
        function: String,
        declared: Vec<Kind>,
        actual: Vec<Kind>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo() -> impl Callable {
        unary(|(s,): (String,)| async move { Ok((s,)) })
    }

    fn echo_signature() -> Signature {
        Signature::new()
            .input("text", Kind::Text)
            .output("text", Kind::Text)
    }

    #[test]
    fn register_and_look_up() {
        let mut reg = Registry::new();
        reg.register("Echo", echo_signature(), echo()).unwrap();

        assert!(reg.lookup("Echo").is_some());
        assert!(reg.lookup("echo").is_none());
        assert_eq!(reg.signatures().len(), 1);
    }

    #[test]
    fn empty_name_rejected() {
        let err = Registry::new()
            .register("", echo_signature(), echo())
            .unwrap_err();
        assert_eq!(err, RegistryError::EmptyName);
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut reg = Registry::new();
        reg.register("Echo", echo_signature(), echo()).unwrap();
        let err = reg.register("Echo", echo_signature(), echo()).unwrap_err();
        assert_eq!(
            err,
            RegistryError::Duplicate {
                function: "Echo".into()
            }
        );
    }

    #[test]
    fn duplicate_parameter_rejected() {
        let sig = Signature::new()
            .input("a", Kind::Text)
            .input("a", Kind::Text)
            .output("out", Kind::Text);
        let callable = unary(|(a, _b): (String, String)| async move { Ok((a,)) });
        let err = Registry::new().register("F", sig, callable).unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateParameter {
                function: "F".into(),
                parameter: "a".into()
            }
        );
    }

    #[test]
    fn declared_kinds_must_match_implementation() {
        // Declared int, implemented text.
        let sig = Signature::new()
            .input("n", Kind::Int)
            .output("text", Kind::Text);
        let err = Registry::new().register("F", sig, echo()).unwrap_err();
        assert!(matches!(err, RegistryError::InputContract { .. }));

        // Declared one output, implementation returns two.
        let sig = Signature::new()
            .input("text", Kind::Text)
            .output("out", Kind::Text);
        let callable = unary(|(s,): (String,)| async move { Ok((s.clone(), s)) });
        let err = Registry::new().register("F", sig, callable).unwrap_err();
        assert!(matches!(err, RegistryError::OutputContract { .. }));
    }

    #[test]
    fn stream_inputs_rejected() {
        let sig = Signature::new()
            .input("chunks", Kind::Stream)
            .output("out", Kind::Text);
        let err = Registry::new().register("F", sig, echo()).unwrap_err();
        assert!(matches!(err, RegistryError::StreamInput { .. }));
    }

    #[test]
    fn stream_output_must_stand_alone() {
        let sig = Signature::new()
            .input("text", Kind::Text)
            .output("chunks", Kind::Stream)
            .output("count", Kind::Int);
        let callable = streaming(|(_s,): (String,)| async move {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        });
        let err = Registry::new().register("F", sig, callable).unwrap_err();
        assert_eq!(
            err,
            RegistryError::StreamShape {
                function: "F".into()
            }
        );
    }

    #[tokio::test]
    async fn unary_adapter_decodes_and_encodes() {
        let callable = unary(|(a, b): (String, i64)| async move { Ok((format!("{a}{b}"),)) });
        assert_eq!(callable.input_kinds(), vec![Kind::Text, Kind::Int]);
        assert_eq!(callable.output_kinds(), vec![Kind::Text]);

        let out = callable
            .invoke(vec![Value::Text("n=".into()), Value::Int(5)])
            .await
            .unwrap();
        let CallOutput::Values(vals) = out else {
            panic!("expected values");
        };
        assert_eq!(vals, vec![Value::Text("n=5".into())]);
    }

    #[tokio::test]
    async fn adapter_reports_contract_violation() {
        // A resolver or dispatcher handing over the wrong kind surfaces
        // as a function failure, not a panic.
        let callable = unary(|(n,): (i64,)| async move { Ok((n,)) });
        let err = callable
            .invoke(vec![Value::Text("five".into())])
            .await
            .unwrap_err();
        assert!(matches!(err, FunctionError::Failed(_)));
        assert!(err.to_string().contains("contract"));
    }

    #[tokio::test]
    async fn streaming_adapter_yields_a_channel() {
        let callable = streaming(|(s,): (String,)| async move {
            let (tx, rx) = mpsc::channel(4);
            tokio::spawn(async move {
                for part in s.split(' ') {
                    if tx.send(Ok(part.to_owned())).await.is_err() {
                        return;
                    }
                }
            });
            Ok(rx)
        });

        let out = callable.invoke(vec![Value::Text("a b".into())]).await.unwrap();
        let CallOutput::Stream(mut rx) = out else {
            panic!("expected stream");
        };
        assert_eq!(rx.recv().await, Some(Ok("a".into())));
        assert_eq!(rx.recv().await, Some(Ok("b".into())));
        assert_eq!(rx.recv().await, None);
    }
}
