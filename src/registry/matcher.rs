//! 路由路径模板匹配

use regex::Regex;
use std::sync::LazyLock;

use super::route::ServiceRoute;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/\{.*?\}").expect("placeholder pattern is valid"));

/// 判断请求路径是否匹配路由模板
///
/// 去掉模板中的 `/{...}` 占位段后，请求路径必须以其开头，剩余部分为空或以 `/` 开头，
/// 且模板与请求路径的段数相同。例如 `/orders/{id}` 匹配 `/orders/42`，
/// 不匹配 `/orders/42/items`。
pub fn matches_template(template: &str, path: &str) -> bool {
    let stripped = PLACEHOLDER.replace_all(template, "");
    let Some(rest) = path.strip_prefix(stripped.as_ref()) else {
        return false;
    };
    if !(rest.is_empty() || rest.starts_with('/')) {
        return false;
    }
    template.split('/').count() == path.split('/').count()
}

/// 按路径查找路由：先精确匹配，再按快照顺序做模板匹配（跳过重载服务）
pub fn find_by_path<'a>(routes: &'a [ServiceRoute], path: &str) -> Option<&'a ServiceRoute> {
    routes
        .iter()
        .find(|r| r.descriptor.route_path == path)
        .or_else(|| {
            routes.iter().find(|r| {
                !r.descriptor.route_path.is_empty()
                    && !r.descriptor.is_overload()
                    && matches_template(&r.descriptor.route_path, path)
            })
        })
}
