use async_trait::async_trait;

use super::context::PipelineContext;

#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn name(&self) -> &'static str;
    async fn execute(&self, context: &mut PipelineContext) -> anyhow::Result<()>;
}
