//! The file-reader node (spec §4.5): reads a deploy's read-only filesystem
//! at `path` (the primary key) and re-emits the file's contents on every
//! `Fs::watch` event.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{FuncError, Result};
use crate::node::{ArgsFrame, CallCtx, InitCtx, Node, NodeInfo, StreamCtx};
use crate::value::{Type, Value};
use crate::world::World;

pub struct FileReader {
    path: Option<String>,
}

impl FileReader {
    pub fn new() -> Self {
        Self { path: None }
    }
}

impl Default for FileReader {
    fn default() -> Self {
        Self::new()
    }
}

async fn watch_if_known(world: &Arc<dyn World>, path: &Option<String>) -> Result<()> {
    match path {
        Some(path) => world.watch(path).await,
        None => std::future::pending().await,
    }
}

#[async_trait]
impl Node for FileReader {
    fn arg_name(&self, i: usize) -> &str {
        assert_eq!(i, 0, "FileReader has exactly one input: the file path");
        "path"
    }

    fn build(&mut self, sig: Type) -> Result<()> {
        let expected = Type::Func(vec![Type::Str], Box::new(Type::Str));
        if sig != expected {
            return Err(FuncError::Type(format!("FileReader: expected {expected}, got {sig}")));
        }
        Ok(())
    }

    fn info(&self) -> NodeInfo {
        NodeInfo::world_coupled(Type::Func(vec![Type::Str], Box::new(Type::Str)))
    }

    fn copy(&self) -> Box<dyn Node> {
        Box::new(FileReader::new())
    }

    async fn init(&mut self, _ctx: InitCtx) -> Result<()> {
        Ok(())
    }

    async fn stream(&mut self, mut ctx: StreamCtx) -> Result<()> {
        loop {
            tokio::select! {
                frame = ctx.input.recv() => {
                    let Some(frame) = frame else { return Ok(()) };
                    let Some(Value::Str(path)) = frame.get("path").cloned() else {
                        return Err(FuncError::Programming("FileReader: expected str \"path\" arg".into()));
                    };
                    match &self.path {
                        None => self.path = Some(path.clone()),
                        Some(prev) if *prev != path => {
                            return Err(FuncError::Programming(format!(
                                "FileReader: primary key changed from {prev:?} to {path:?}"
                            )));
                        }
                        _ => {}
                    }
                    let contents = ctx.world.read_to_string(&path).await?;
                    ctx.emit(Value::Str(contents));
                }
                res = watch_if_known(&ctx.world, &self.path) => {
                    match res {
                        Ok(()) => {
                            let path = self.path.clone().expect("watch only resolves once path is known");
                            let contents = ctx.world.read_to_string(&path).await?;
                            ctx.emit(Value::Str(contents));
                        }
                        Err(FuncError::EndOfStream) => return Ok(()),
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    async fn call(&self, _ctx: &CallCtx, _args: ArgsFrame) -> Result<Value> {
        Err(FuncError::CannotSpeculate("FileReader requires a live filesystem watch".into()))
    }
}
