use bytes::Bytes;
use edgeward::plugin::{Context, Expression, ExpressionError, Scheme, Template, Value};

fn request(method: &str, uri: &str) -> Context {
    Context::new(
        hyper::Request::builder()
            .method(method)
            .uri(uri)
            .header("host", "shop.example.com:8443")
            .header("x-role", "admin")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Bytes::from_static(b"user=kim&lang=ko"))
            .unwrap(),
    )
    .with_scheme(Scheme::Https)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_request_tags() {
        let ctx = request("POST", "/cart/items?page=3");
        let template = Template::new("${scheme}://${header:host}${path}?p=${query:page}&u=${form:user}").unwrap();
        assert_eq!(template.render(&ctx), "https://shop.example.com:8443/cart/items?p=3&u=kim");
    }

    #[test]
    fn test_static_template() {
        let template = Template::new("no tags here").unwrap();
        assert!(template.is_static());
        assert_eq!(template.render(&request("GET", "/")), "no tags here");
    }

    #[test]
    fn test_missing_values_render_empty() {
        let template = Template::new("[${header:x-missing}][${query:none}]").unwrap();
        assert_eq!(template.render(&request("GET", "/")), "[][]");
    }

    #[test]
    fn test_path_params() {
        let mut ctx = request("GET", "/users/7/files/a/b.txt");
        ctx.set_param("id", "7");
        ctx.set_param("*", "a/b.txt");
        let template = Template::new("${path:id}:${path:*}").unwrap();
        assert_eq!(template.render(&ctx), "7:a/b.txt");
    }

    #[test]
    fn test_expression_with_tags() {
        let ctx = request("POST", "/admin/settings");
        let skip = Expression::new("${method} == 'GET' || ${header:x-role} != 'admin'").unwrap();
        assert_eq!(skip.evaluate(&ctx).unwrap(), Value::Bool(false));

        let admin = Expression::new("${path} =~ '^/admin' && ${header:x-role} == 'admin'").unwrap();
        assert!(admin.evaluate(&ctx).unwrap().is_truthy());
    }

    #[test]
    fn test_expression_numeric_query() {
        let ctx = request("GET", "/list?page=12");
        let expr = Expression::new("${query:page} > 10 ? 'deep' : 'shallow'").unwrap();
        assert_eq!(expr.evaluate(&ctx).unwrap(), Value::Str("deep".to_string()));
    }

    #[test]
    fn test_header_values_are_quoted() {
        let ctx = Context::new(
            hyper::Request::builder()
                .uri("/")
                .header("x-name", "it's")
                .body(Bytes::new())
                .unwrap(),
        );
        let expr = Expression::new("${header:x-name} == \"it's\"").unwrap();
        assert_eq!(expr.evaluate(&ctx).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_template_errors() {
        assert!(matches!(
            Template::new("${method"),
            Err(ExpressionError::UnclosedTag { position: 0 })
        ));
        assert!(Expression::new("1 +").is_err());
        assert!(matches!(
            Expression::new("${query:n} / 0").unwrap().evaluate(&request("GET", "/?n=4")),
            Err(ExpressionError::DivisionByZero)
        ));
    }
}
