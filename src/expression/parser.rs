use chumsky::prelude::*;

/// Parsed directive expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Str(String),
    Number(f64),
    Ident(String),
    Member(Box<Expr>, String),
    Call(Box<Expr>, Vec<Expr>),
}

enum Postfix {
    Member(String),
    Call(Vec<Expr>),
}

fn expression() -> impl Parser<char, Expr, Error = Simple<char>> {
    recursive(|expr| {
        let single_quoted = just('\'')
            .ignore_then(filter(|c: &char| *c != '\'').repeated().collect::<String>())
            .then_ignore(just('\''));
        let double_quoted = just('"')
            .ignore_then(filter(|c: &char| *c != '"').repeated().collect::<String>())
            .then_ignore(just('"'));
        let string = single_quoted.or(double_quoted).map(Expr::Str);

        let number = text::int(10)
            .then(just('.').ignore_then(text::digits(10)).or_not())
            .try_map(|(whole, fraction): (String, Option<String>), span| {
                let literal = match fraction {
                    Some(fraction) => format!("{}.{}", whole, fraction),
                    None => whole,
                };
                literal
                    .parse::<f64>()
                    .map(Expr::Number)
                    .map_err(|_| Simple::custom(span, "invalid number literal"))
            });

        let ident = text::ident().map(Expr::Ident);

        let group = expr.clone().delimited_by(just('('), just(')'));

        let atom = choice((string, number, ident, group)).padded();

        let args = expr
            .clone()
            .separated_by(just(','))
            .allow_trailing()
            .padded()
            .delimited_by(just('('), just(')'));

        let postfix = choice((
            just('.').padded().ignore_then(text::ident()).map(Postfix::Member),
            args.map(Postfix::Call),
        ))
        .padded();

        atom.then(postfix.repeated()).foldl(|lhs, op| match op {
            Postfix::Member(name) => Expr::Member(Box::new(lhs), name),
            Postfix::Call(args) => Expr::Call(Box::new(lhs), args),
        })
    })
}

/// Parse a complete expression; trailing input is an error
pub fn parse_expression(source: &str) -> Result<Expr, String> {
    expression()
        .then_ignore(end())
        .parse(source)
        .map_err(|errors| {
            errors
                .into_iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ")
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> Box<Expr> {
        Box::new(Expr::Ident(name.to_string()))
    }

    #[test]
    fn member_chain() {
        assert_eq!(
            parse_expression("params.user.name").unwrap(),
            Expr::Member(Box::new(Expr::Member(ident("params"), "user".into())), "name".into())
        );
    }

    #[test]
    fn calls_with_literals() {
        assert_eq!(
            parse_expression("render('/a.html', params , \"#main\")").unwrap(),
            Expr::Call(
                ident("render"),
                vec![
                    Expr::Str("/a.html".into()),
                    Expr::Ident("params".into()),
                    Expr::Str("#main".into()),
                ]
            )
        );
    }

    #[test]
    fn method_style_call_and_numbers() {
        let parsed = parse_expression(" site.search('wiki').length ").unwrap();
        assert_eq!(
            parsed,
            Expr::Member(
                Box::new(Expr::Call(
                    Box::new(Expr::Member(ident("site"), "search".into())),
                    vec![Expr::Str("wiki".into())]
                )),
                "length".into()
            )
        );
        assert_eq!(parse_expression("2.5").unwrap(), Expr::Number(2.5));
        assert_eq!(parse_expression("now()").unwrap(), Expr::Call(ident("now"), vec![]));
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse_expression("params.").is_err());
        assert!(parse_expression("render('x'").is_err());
        assert!(parse_expression("a b").is_err());
        assert!(parse_expression("").is_err());
    }
}
