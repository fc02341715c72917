use crate::descriptor::ElementDescriptor;
use crate::materialize::{
    MaterializedNode, Materializer, ProxyRegistry, SURFACE_BRIDGE_SCRIPT, render_nodes,
};
use crate::utils::escape_text;

pub const APP_HEADER_ID: &str = "app-header";
pub const APP_MAIN_ID: &str = "app-main";
pub const APP_FOOTER_ID: &str = "app-footer";

const DEFAULT_TITLE: &str = "Simplified view";

/// Deterministic surface builder: materialized elements in a fixed skeleton
#[derive(Debug, Clone)]
pub struct Assembler {
    theme_stylesheet: String,
    materializer: Materializer,
}

impl Assembler {
    pub fn new(theme_stylesheet: &str) -> Self {
        Self {
            theme_stylesheet: theme_stylesheet.to_string(),
            materializer: Materializer::new(),
        }
    }

    /// Materialize `selected`, registering proxies in `registry`
    pub fn materialize(
        &self,
        selected: &[ElementDescriptor],
        registry: &mut ProxyRegistry,
    ) -> Vec<MaterializedNode> {
        self.materializer.materialize(selected, registry)
    }

    pub fn assemble(
        &self,
        selected: &[ElementDescriptor],
        title: Option<&str>,
        registry: &mut ProxyRegistry,
    ) -> String {
        let nodes = self.materialize(selected, registry);
        self.assemble_nodes(&nodes, title)
    }

    /// Wrap already materialized nodes into the document skeleton
    pub fn assemble_nodes(&self, nodes: &[MaterializedNode], title: Option<&str>) -> String {
        let title = escape_text(
            title
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .unwrap_or(DEFAULT_TITLE),
        );
        let stylesheet = crate::utils::escape_attr(&self.theme_stylesheet);
        let body = render_nodes(nodes);

        format!(
            "<!DOCTYPE html>\n\
             <html lang=\"en\">\n\
             <head>\n\
             <meta charset=\"utf-8\">\n\
             <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
             <title>{title}</title>\n\
             <link rel=\"stylesheet\" href=\"{stylesheet}\">\n\
             </head>\n\
             <body class=\"retro-surface\">\n\
             <header id=\"{APP_HEADER_ID}\"><h1>{title}</h1></header>\n\
             <main id=\"{APP_MAIN_ID}\">\n{body}\n</main>\n\
             <footer id=\"{APP_FOOTER_ID}\"></footer>\n\
             <script>{SURFACE_BRIDGE_SCRIPT}</script>\n\
             </body>\n\
             </html>\n"
        )
    }
}
