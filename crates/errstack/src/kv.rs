//! The annotation capability: `KeyValuer`, plus the erased `Key` and `Value`
//! handles every annotation kind is built from.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

// ── Key ───────────────────────────────────────────────────────────

/// Object-safe shim over `Eq + Hash`, so keys of different concrete types can
/// live in one chain and still compare by value.
trait DynKey: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn dyn_eq(&self, other: &dyn DynKey) -> bool;
    fn dyn_hash(&self, state: &mut dyn Hasher);
    fn debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

impl<K> DynKey for K
where
    K: Eq + Hash + fmt::Debug + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn DynKey) -> bool {
        other
            .as_any()
            .downcast_ref::<K>()
            .map_or(false, |other| self == other)
    }

    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        // Two equal values of different types must not collide.
        TypeId::of::<K>().hash(&mut state);
        self.hash(&mut state);
    }

    fn debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A key identity. Compares by concrete type and value, never by instance.
///
/// The `Eq + Hash` bound on [`Key::new`] is what makes every key comparable;
/// an incomparable key is a compile error at the construction site, not a
/// corrupted chain at query time.
#[derive(Clone)]
pub struct Key {
    inner: Arc<dyn DynKey>,
}

impl Key {
    /// Erase a concrete key value into a `Key`.
    ///
    /// ```
    /// use errstack::Key;
    /// assert_eq!(Key::new(7u32), Key::new(7u32));
    /// assert_ne!(Key::new(7u32), Key::new(7u64)); // different type, never equal
    /// ```
    pub fn new<K>(key: K) -> Self
    where
        K: Eq + Hash + fmt::Debug + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(key),
        }
    }

    /// The `TypeId` of the concrete key type. Used by the shape-filtered
    /// map queries.
    pub fn type_id(&self) -> TypeId {
        self.inner.as_any().type_id()
    }

    /// Borrow the concrete key value, if it is a `K`.
    pub fn downcast_ref<K: Any>(&self) -> Option<&K> {
        self.inner.as_any().downcast_ref::<K>()
    }

    /// True for the four reserved kinds (Op, Severity, Code, Formatter).
    /// Their key types are private, so generic context queries skip them
    /// and user keys can never collide with them.
    pub(crate) fn is_builtin(&self) -> bool {
        let id = self.type_id();
        id == TypeId::of::<crate::op::OpKey>()
            || id == TypeId::of::<crate::severity::SeverityKey>()
            || id == TypeId::of::<crate::code::CodeKey>()
            || id == TypeId::of::<crate::formatter::FormatterKey>()
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.inner.dyn_eq(other.inner.as_ref())
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.dyn_hash(state);
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.debug(f)
    }
}

// ── Value ─────────────────────────────────────────────────────────

type RenderFn = fn(&(dyn Any + Send + Sync)) -> Option<String>;

/// An annotation payload: any value, retrievable by downcast, with a
/// best-effort textual form captured at construction.
#[derive(Clone)]
pub struct Value {
    inner: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
    render: Option<RenderFn>,
}

impl Value {
    /// Wrap a displayable value. Its `Display` output is what
    /// [`Value::stringify`] returns.
    pub fn new<V>(value: V) -> Self
    where
        V: fmt::Display + Any + Send + Sync,
    {
        fn render<V: fmt::Display + Any>(v: &(dyn Any + Send + Sync)) -> Option<String> {
            v.downcast_ref::<V>().map(|v| v.to_string())
        }

        Self {
            inner: Arc::new(value),
            type_name: std::any::type_name::<V>(),
            render: Some(render::<V>),
        }
    }

    /// Wrap a value with no natural textual form. [`Value::stringify`] falls
    /// back to raw string payloads, then to the concrete type name.
    pub fn opaque<V>(value: V) -> Self
    where
        V: Any + Send + Sync,
    {
        Self {
            inner: Arc::new(value),
            type_name: std::any::type_name::<V>(),
            render: None,
        }
    }

    /// Borrow the concrete value, if it is a `V`.
    pub fn downcast_ref<V: Any>(&self) -> Option<&V> {
        self.inner.downcast_ref::<V>()
    }

    /// Name of the concrete type stored inside.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Best-effort text: the value's own `Display` when captured, then raw
    /// string payloads, then the type name.
    pub fn stringify(&self) -> String {
        if let Some(render) = self.render {
            if let Some(text) = render(self.inner.as_ref()) {
                return text;
            }
        }
        if let Some(s) = self.downcast_ref::<String>() {
            return s.clone();
        }
        if let Some(s) = self.downcast_ref::<&str>() {
            return (*s).to_string();
        }
        self.type_name.to_string()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.stringify())
    }
}

// ── KeyValuer ─────────────────────────────────────────────────────

/// The capability every annotation must satisfy: a comparable key identity
/// and an arbitrary value.
pub trait KeyValuer: Send + Sync {
    fn key(&self) -> Key;
    fn value(&self) -> Value;
}

// ── KeyValue ──────────────────────────────────────────────────────

/// Caller-supplied context: an arbitrary (key, value) pair.
///
/// Keys compare by type and value, so a `String` key and a `u32` key can
/// never collide. Prefer [`kv`] for the common string-keyed case.
#[derive(Clone)]
pub struct KeyValue {
    key: Key,
    value: Value,
}

impl KeyValue {
    /// A context pair with an arbitrary typed key and a displayable value.
    pub fn new<K, V>(key: K, value: V) -> Self
    where
        K: Eq + Hash + fmt::Debug + Send + Sync + 'static,
        V: fmt::Display + Any + Send + Sync,
    {
        Self {
            key: Key::new(key),
            value: Value::new(value),
        }
    }

    /// A context pair whose value has no textual form.
    pub fn opaque<K, V>(key: K, value: V) -> Self
    where
        K: Eq + Hash + fmt::Debug + Send + Sync + 'static,
        V: Any + Send + Sync,
    {
        Self {
            key: Key::new(key),
            value: Value::opaque(value),
        }
    }
}

impl KeyValuer for KeyValue {
    fn key(&self) -> Key {
        self.key.clone()
    }

    fn value(&self) -> Value {
        self.value.clone()
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value.stringify())
    }
}

impl fmt::Debug for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyValue")
            .field("key", &self.key)
            .field("value", &self.value)
            .finish()
    }
}

/// String-keyed context, the common case: `kv("user_id", 42)`.
pub fn kv<V>(key: impl Into<String>, value: V) -> KeyValue
where
    V: fmt::Display + Any + Send + Sync,
{
    KeyValue::new(key.into(), value)
}

/// String-keyed context with a value that has no textual form.
pub fn kv_opaque<V>(key: impl Into<String>, value: V) -> KeyValue
where
    V: Any + Send + Sync,
{
    KeyValue::opaque(key.into(), value)
}
