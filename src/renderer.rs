use crate::task::RenderTask;

use async_trait::async_trait;
use mapforge_map::LoadedArea;

/// Produces the bytes of one artifact from the loaded chunks around it.
///
/// Implementations own all drawing. `area` always covers `task.data_rect`.
#[async_trait(?Send)]
pub trait LayerRenderer<C> {
    async fn render(&self, task: &RenderTask<'_>, area: &LoadedArea<'_, C>) -> anyhow::Result<Vec<u8>>;
}
