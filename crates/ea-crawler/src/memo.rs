//! Disk memoization of expensive operations.
//!
//! A [`Memoized`] pairs an operation with a key template and the signature
//! its calls are bound against. Calling it resolves the key, returns the
//! stored value when the key's file exists and otherwise runs the operation
//! and stores its result. The store being on disk, an operation runs at most
//! once per key across process restarts.
//!
//! There is no locking: two callers racing on the same key may both run the
//! operation, the last write wins.

use std::fmt;
use std::marker::PhantomData;

use crate::error::{Result, TemplateError};
use crate::store::{Storable, Store};
use crate::template::{Args, Bindings, KeyTemplate, Signature};

/// Anything memoized operations can run against.
pub trait MemoContext {
    fn store(&self) -> &Store;
}

impl MemoContext for Store {
    fn store(&self) -> &Store {
        self
    }
}

pub struct Memoized<T, F> {
    template: KeyTemplate,
    signature: Signature,
    op: F,
    _value: PhantomData<fn() -> T>,
}

impl<T, F> fmt::Debug for Memoized<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoized")
            .field("template", &self.template)
            .field("signature", &self.signature)
            .finish()
    }
}

impl<T, F> Memoized<T, F> {
    /// Fails if `template` references a parameter `signature` doesn't declare.
    pub fn new(template: &str, signature: Signature, op: F) -> Result<Self, TemplateError> {
        let template = KeyTemplate::parse(template)?;
        template.check(&signature)?;
        Ok(Self {
            template,
            signature,
            op,
            _value: PhantomData,
        })
    }

    pub fn template(&self) -> &KeyTemplate {
        &self.template
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    fn bind<C>(&self, ctx: &C, args: &Args) -> Result<(String, Bindings), TemplateError>
    where
        C: MemoContext + ?Sized,
    {
        let bindings = self.signature.bind(args)?.with_root(ctx.store().root());
        let key = self.template.resolve(&bindings)?;
        Ok((key, bindings))
    }

    /// The store path `args` resolve to, relative to the context's root.
    pub fn key<C>(&self, ctx: &C, args: &Args) -> Result<String, TemplateError>
    where
        C: MemoContext + ?Sized,
    {
        self.bind(ctx, args).map(|(key, _)| key)
    }

    pub fn is_cached<C>(&self, ctx: &C, args: &Args) -> Result<bool>
    where
        C: MemoContext + ?Sized,
    {
        let key = self.key(ctx, args)?;
        Ok(ctx.store().contains(key))
    }
}

impl<T, F> Memoized<T, F>
where
    T: Storable,
{
    pub fn call<C>(&self, ctx: &C, args: &Args) -> Result<T>
    where
        C: MemoContext + ?Sized,
        F: Fn(&C, &Bindings) -> Result<T>,
    {
        let (key, bindings) = self.bind(ctx, args)?;
        let store = ctx.store();

        if let Some(value) = store.read::<T>(&key)? {
            log::debug!("memoized {key}");
            return Ok(value);
        }

        let value = (self.op)(ctx, &bindings)?;
        store.write(&key, &value)?;
        Ok(value)
    }
}
