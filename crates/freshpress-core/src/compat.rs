//! Legacy names for the public types, kept so code written against the
//! `WP_REST_*` class names can migrate without a rename pass.

use crate::controller::comments::CommentsController;
use crate::controller::meta::MetaFields;
use crate::controller::oembed::OEmbedController;
use crate::controller::post_types::PostTypesController;
use crate::controller::posts::PostsController;
use crate::controller::revisions::RevisionsController;
use crate::controller::taxonomies::TaxonomiesController;
use crate::request::Request;
use crate::response::Response;
use crate::server::RestServer;

pub type WpRestServer = RestServer;
pub type WpRestRequest = Request;
pub type WpRestResponse = Response;
pub type WpRestPostsController = PostsController;
pub type WpRestCommentsController = CommentsController;
pub type WpRestRevisionsController = RevisionsController;
pub type WpRestTaxonomiesController = TaxonomiesController;
pub type WpRestPostTypesController = PostTypesController;
pub type WpRestMetaFields = MetaFields;
pub type WpOEmbedController = OEmbedController;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::registry::{Registry, SiteOptions};
    use crate::types::Method;
    use std::sync::Arc;

    #[test]
    fn aliases_name_the_same_types() {
        let registry = Arc::new(Registry::with_defaults(SiteOptions::default()));
        let posts: WpRestPostsController = PostsController::new("post", Arc::clone(&registry));
        let _: PostsController = posts;
        let req: WpRestRequest = Request::new(Method::Get, "/wp/v2/posts");
        assert_eq!(req.route(), "/wp/v2/posts");
        let server = WpRestServer::new(registry);
        assert_eq!(server.route_paths().count(), 0);
    }
}
