use std::fmt;
use std::rc::Rc;

/// Translation unit: preprocessor lines, comments and functions, rendered in order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    items: Vec<Item>,
}

impl Module {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn push(&mut self, item: Item) {
        self.items.push(item);
    }

    pub fn extend<I: IntoIterator<Item = Item>>(&mut self, items: I) {
        self.items.extend(items);
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn to_c(&self) -> String {
        let mut out = String::new();
        let mut ctx = RenderContext::new(&mut out);
        let mut previous: Option<&Item> = None;
        for item in &self.items {
            // Runs of preprocessor lines stay together.
            if let Some(previous) = previous {
                if !(previous.is_preprocessor() && item.is_preprocessor()) {
                    ctx.blank_line();
                }
            }
            item.render(&mut ctx);
            previous = Some(item);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Comment(String),
    /// `#include <header>`
    Include(String),
    Define {
        name: String,
        params: Vec<String>,
        body: String,
    },
    Function(Function),
}

impl Item {
    pub fn define(name: impl Into<String>, params: Vec<String>, body: impl Into<String>) -> Self {
        Item::Define {
            name: name.into(),
            params,
            body: body.into(),
        }
    }

    fn is_preprocessor(&self) -> bool {
        matches!(self, Item::Include(_) | Item::Define { .. })
    }

    fn render(&self, ctx: &mut RenderContext<'_>) {
        match self {
            Item::Comment(text) => {
                for line in text.lines() {
                    ctx.line(&format!("/* {} */", line));
                }
            }
            Item::Include(header) => ctx.line(&format!("#include <{}>", header)),
            Item::Define { name, params, body } => {
                if params.is_empty() {
                    ctx.line(&format!("#define {} {}", name, body));
                } else {
                    ctx.line(&format!("#define {}({}) {}", name, params.join(", "), body));
                }
            }
            Item::Function(function) => function.render(ctx),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: Type,
    pub body: Block,
}

impl Function {
    pub fn new(name: impl Into<String>, params: Vec<Param>, ret: Type, body: Block) -> Self {
        Self {
            name: name.into(),
            params,
            ret,
            body,
        }
    }

    fn render(&self, ctx: &mut RenderContext<'_>) {
        let params = if self.params.is_empty() {
            "void".to_string()
        } else {
            self.params
                .iter()
                .map(Param::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        ctx.line(&format!("{} {}({})", self.ret, self.name, params));
        ctx.line("{");
        ctx.indent();
        self.body.render(ctx);
        ctx.dedent();
        ctx.line("}");
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ty.is_pointer() {
            // `double *restrict u`
            write!(f, "{}{}", self.ty, self.name)
        } else {
            write!(f, "{} {}", self.ty, self.name)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Void,
    Long,
    Float,
    Double,
    Const(Box<Type>),
    RestrictPtr(Box<Type>),
}

impl Type {
    pub fn constant(inner: Type) -> Self {
        Type::Const(Box::new(inner))
    }

    pub fn restrict_ptr(inner: Type) -> Self {
        Type::RestrictPtr(Box::new(inner))
    }

    pub fn is_pointer(&self) -> bool {
        match self {
            Type::RestrictPtr(_) => true,
            Type::Const(inner) => inner.is_pointer(),
            _ => false,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Long => write!(f, "long"),
            Type::Float => write!(f, "float"),
            Type::Double => write!(f, "double"),
            Type::Const(inner) => write!(f, "const {}", inner),
            Type::RestrictPtr(inner) => write!(f, "{} *restrict ", inner),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

impl Block {
    pub fn new(stmts: Vec<Stmt>) -> Self {
        Self { stmts }
    }

    pub fn push(&mut self, stmt: Stmt) {
        self.stmts.push(stmt);
    }

    pub fn is_empty(&self) -> bool {
        self.stmts.is_empty()
    }

    fn render(&self, ctx: &mut RenderContext<'_>) {
        for stmt in &self.stmts {
            stmt.render(ctx);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Comment(String),
    /// `#pragma` line, indented with the enclosing block.
    Pragma(String),
    Decl {
        ty: Type,
        name: String,
        expr: Option<Expr>,
    },
    Assign {
        target: Expr,
        value: Expr,
    },
    If {
        cond: Expr,
        then_block: Block,
    },
    For {
        var: String,
        ty: Type,
        init: Expr,
        /// Exclusive upper bound: `var < end`.
        end: Expr,
        step: ForStep,
        body: Block,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ForStep {
    Increment,
    AddAssign(Expr),
}

impl Stmt {
    pub fn decl(ty: Type, name: impl Into<String>, expr: Option<Expr>) -> Self {
        Stmt::Decl {
            ty,
            name: name.into(),
            expr,
        }
    }

    pub fn assign(target: Expr, value: Expr) -> Self {
        Stmt::Assign { target, value }
    }

    pub fn for_range(
        var: impl Into<String>,
        init: Expr,
        end: Expr,
        step: ForStep,
        body: Block,
    ) -> Self {
        Stmt::For {
            var: var.into(),
            ty: Type::Long,
            init,
            end,
            step,
            body,
        }
    }

    fn render(&self, ctx: &mut RenderContext<'_>) {
        match self {
            Stmt::Comment(text) => ctx.line(&format!("/* {} */", text)),
            Stmt::Pragma(text) => ctx.line(&format!("#pragma {}", text)),
            Stmt::Decl { ty, name, expr } => match expr {
                Some(expr) => ctx.line(&format!("{} {} = {};", ty, name, expr)),
                None => ctx.line(&format!("{} {};", ty, name)),
            },
            Stmt::Assign { target, value } => {
                ctx.line(&format!("{} = {};", target, value));
            }
            Stmt::If { cond, then_block } => {
                ctx.line(&format!("if ({}) {{", cond));
                ctx.indent();
                then_block.render(ctx);
                ctx.dedent();
                ctx.line("}");
            }
            Stmt::For {
                var,
                ty,
                init,
                end,
                step,
                body,
            } => {
                let step = match step {
                    ForStep::Increment => format!("{}++", var),
                    ForStep::AddAssign(expr) => format!("{} += {}", var, expr),
                };
                ctx.line(&format!(
                    "for ({} {} = {}; {} < {}; {}) {{",
                    ty, var, init, var, end, step
                ));
                ctx.indent();
                body.render(ctx);
                ctx.dedent();
                ctx.line("}");
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    And,
    Or,
}

impl BinaryOp {
    fn precedence(self) -> Precedence {
        match self {
            BinaryOp::Or => Precedence::Or,
            BinaryOp::And => Precedence::And,
            BinaryOp::Equal => Precedence::Equality,
            BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
                Precedence::Comparison
            }
            BinaryOp::Add | BinaryOp::Sub => Precedence::Sum,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => Precedence::Product,
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::Equal => "==",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        };
        f.write_str(op)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Double(f64),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(v) => write!(f, "{}", v),
            Literal::Double(v) if v.is_nan() => write!(f, "NAN"),
            Literal::Double(v) if v.is_infinite() => {
                write!(f, "{}INFINITY", if *v < 0.0 { "-" } else { "" })
            }
            // `{:?}` keeps a decimal point or exponent, so the literal stays a double.
            Literal::Double(v) => write!(f, "{:?}", v),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ExprNode {
    Literal(Literal),
    Ident(String),
    Call { callee: String, args: Vec<Expr> },
    Cast { ty: Type, expr: Expr },
    Neg(Expr),
    Binary { left: Expr, op: BinaryOp, right: Expr },
}

/// Immutable C expression. Cloning shares the subtree.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr(Rc<ExprNode>);

impl Expr {
    fn from_node(node: ExprNode) -> Self {
        Self(Rc::new(node))
    }

    pub fn ident(name: impl Into<String>) -> Self {
        Self::from_node(ExprNode::Ident(name.into()))
    }

    pub fn lit_int(value: i64) -> Self {
        Self::from_node(ExprNode::Literal(Literal::Int(value)))
    }

    pub fn lit_f64(value: f64) -> Self {
        Self::from_node(ExprNode::Literal(Literal::Double(value)))
    }

    pub fn call_named(callee: impl Into<String>, args: Vec<Expr>) -> Self {
        Self::from_node(ExprNode::Call {
            callee: callee.into(),
            args,
        })
    }

    pub fn cast(ty: Type, expr: Expr) -> Self {
        Self::from_node(ExprNode::Cast { ty, expr })
    }

    pub fn binary(left: Expr, op: BinaryOp, right: Expr) -> Self {
        Self::from_node(ExprNode::Binary { left, op, right })
    }

    pub fn lt(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(self, BinaryOp::Less, rhs.into())
    }

    pub fn ge(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(self, BinaryOp::GreaterEqual, rhs.into())
    }

    pub fn and(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(self, BinaryOp::And, rhs.into())
    }

    pub fn rem(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(self, BinaryOp::Rem, rhs.into())
    }

    /// `self + offset` folded for the common index forms `i + 0`, `i + 2`, `i - 1`.
    pub fn offset_by(self, offset: i64) -> Self {
        match offset {
            0 => self,
            o if o > 0 => self + Expr::lit_int(o),
            o => self - Expr::lit_int(-o),
        }
    }

    pub fn try_f64_literal(&self) -> Option<f64> {
        match self.0.as_ref() {
            ExprNode::Literal(Literal::Double(v)) => Some(*v),
            _ => None,
        }
    }

    fn try_int_literal(&self) -> Option<i64> {
        match self.0.as_ref() {
            ExprNode::Literal(Literal::Int(v)) => Some(*v),
            _ => None,
        }
    }

    fn precedence(&self) -> Precedence {
        match self.0.as_ref() {
            ExprNode::Literal(_) | ExprNode::Ident(_) | ExprNode::Call { .. } => {
                Precedence::Postfix
            }
            ExprNode::Cast { .. } | ExprNode::Neg(_) => Precedence::Prefix,
            ExprNode::Binary { op, .. } => op.precedence(),
        }
    }
}

impl std::ops::Add for Expr {
    type Output = Expr;

    fn add(self, rhs: Expr) -> Expr {
        Expr::binary(self, BinaryOp::Add, rhs)
    }
}

impl std::ops::Sub for Expr {
    type Output = Expr;

    fn sub(self, rhs: Expr) -> Expr {
        Expr::binary(self, BinaryOp::Sub, rhs)
    }
}

impl std::ops::Mul for Expr {
    type Output = Expr;

    fn mul(self, rhs: Expr) -> Expr {
        Expr::binary(self, BinaryOp::Mul, rhs)
    }
}

impl std::ops::Div for Expr {
    type Output = Expr;

    fn div(self, rhs: Expr) -> Expr {
        Expr::binary(self, BinaryOp::Div, rhs)
    }
}

impl std::ops::Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        Expr::from_node(ExprNode::Neg(self))
    }
}

impl From<&str> for Expr {
    fn from(value: &str) -> Self {
        Expr::ident(value)
    }
}

impl From<String> for Expr {
    fn from(value: String) -> Self {
        Expr::ident(value)
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Expr::lit_int(value)
    }
}

impl From<usize> for Expr {
    fn from(value: usize) -> Self {
        Expr::lit_int(value as i64)
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::lit_f64(value)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        render_expr(self, f, Precedence::Lowest)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Lowest,
    Or,
    And,
    Equality,
    Comparison,
    Sum,
    Product,
    Prefix,
    Postfix,
}

fn next_precedence(prec: Precedence) -> Precedence {
    match prec {
        Precedence::Lowest => Precedence::Or,
        Precedence::Or => Precedence::And,
        Precedence::And => Precedence::Equality,
        Precedence::Equality => Precedence::Comparison,
        Precedence::Comparison => Precedence::Sum,
        Precedence::Sum => Precedence::Product,
        Precedence::Product => Precedence::Prefix,
        Precedence::Prefix | Precedence::Postfix => Precedence::Postfix,
    }
}

fn render_expr(expr: &Expr, f: &mut fmt::Formatter<'_>, parent_prec: Precedence) -> fmt::Result {
    match expr.0.as_ref() {
        ExprNode::Literal(lit) => {
            // A negative literal is a prefix expression in C.
            let negative = matches!(lit, Literal::Int(v) if *v < 0)
                || matches!(lit, Literal::Double(v) if v.is_sign_negative() && !v.is_nan());
            let needs_paren = negative && Precedence::Prefix < parent_prec;
            if needs_paren {
                write!(f, "({})", lit)
            } else {
                write!(f, "{}", lit)
            }
        }
        ExprNode::Ident(name) => write!(f, "{}", name),
        ExprNode::Call { callee, args } => {
            write!(f, "{}(", callee)?;
            for (idx, arg) in args.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                render_expr(arg, f, Precedence::Lowest)?;
            }
            write!(f, ")")
        }
        ExprNode::Cast { ty, expr } => {
            let needs_paren = Precedence::Prefix < parent_prec;
            if needs_paren {
                write!(f, "(")?;
            }
            write!(f, "({})", ty)?;
            render_expr(expr, f, Precedence::Prefix)?;
            if needs_paren {
                write!(f, ")")?;
            }
            Ok(())
        }
        ExprNode::Neg(inner) => render_negated_expr(inner, f, parent_prec),
        ExprNode::Binary { left, op, right } => {
            if let Some(simplified) = simplify_binary_expr(left, *op, right, f, parent_prec) {
                return simplified;
            }

            let prec = op.precedence();
            let needs_paren = prec < parent_prec;
            if needs_paren {
                write!(f, "(")?;
            }
            render_expr(left, f, prec)?;
            write!(f, " {} ", op)?;
            // Subtraction and division are not associative; preserve RHS grouping.
            let right_prec = match op {
                BinaryOp::Sub | BinaryOp::Div | BinaryOp::Rem => next_precedence(prec),
                _ => prec,
            };
            render_expr(right, f, right_prec)?;
            if needs_paren {
                write!(f, ")")?;
            }
            Ok(())
        }
    }
}

fn simplify_binary_expr(
    left: &Expr,
    op: BinaryOp,
    right: &Expr,
    f: &mut fmt::Formatter<'_>,
    parent_prec: Precedence,
) -> Option<fmt::Result> {
    let is_one = |e: &Expr| e.try_f64_literal() == Some(1.0) || e.try_int_literal() == Some(1);
    match op {
        BinaryOp::Mul => {
            if is_one(left) {
                return Some(render_expr(right, f, parent_prec));
            }
            if is_one(right) {
                return Some(render_expr(left, f, parent_prec));
            }
            if left.try_f64_literal() == Some(-1.0) {
                return Some(render_negated_expr(right, f, parent_prec));
            }
            if right.try_f64_literal() == Some(-1.0) {
                return Some(render_negated_expr(left, f, parent_prec));
            }
        }
        BinaryOp::Div if is_one(right) => {
            return Some(render_expr(left, f, parent_prec));
        }
        _ => {}
    }
    None
}

fn render_negated_expr(
    expr: &Expr,
    f: &mut fmt::Formatter<'_>,
    parent_prec: Precedence,
) -> fmt::Result {
    let prec = Precedence::Prefix;
    let needs_paren = prec < parent_prec;
    if needs_paren {
        write!(f, "(")?;
    }
    write!(f, "-")?;
    // `- -x` must not become the decrement operator.
    let inner = format!("{}", DisplayAt(expr, prec));
    if inner.starts_with('-') {
        write!(f, "({})", inner)?;
    } else {
        write!(f, "{}", inner)?;
    }
    if needs_paren {
        write!(f, ")")?;
    }
    Ok(())
}

struct DisplayAt<'a>(&'a Expr, Precedence);

impl fmt::Display for DisplayAt<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        render_expr(self.0, f, self.1)
    }
}

struct RenderContext<'a> {
    output: &'a mut String,
    indent: usize,
}

impl<'a> RenderContext<'a> {
    fn new(output: &'a mut String) -> Self {
        Self { output, indent: 0 }
    }

    fn indent(&mut self) {
        self.indent += 1;
    }

    fn dedent(&mut self) {
        self.indent = self.indent.saturating_sub(1);
    }

    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.output.push_str("    ");
        }
        self.output.push_str(text);
        self.output.push('\n');
    }

    fn blank_line(&mut self) {
        self.output.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expr_builders_render_expected_c() {
        let expr = Expr::ident("a") + Expr::ident("b") * Expr::ident("c");
        assert_eq!(expr.to_string(), "a + b * c");

        let expr = (Expr::ident("a") + Expr::ident("b")) * Expr::ident("c");
        assert_eq!(expr.to_string(), "(a + b) * c");

        let expr = Expr::ident("a") - (Expr::ident("b") - Expr::ident("c"));
        assert_eq!(expr.to_string(), "a - (b - c)");

        let expr = Expr::call_named("AT_u", vec!["u_cur".into(), Expr::ident("i0").offset_by(-1)]);
        assert_eq!(expr.to_string(), "AT_u(u_cur, i0 - 1)");
    }

    #[test]
    fn literals_stay_doubles() {
        assert_eq!(Expr::lit_f64(1.0).to_string(), "1.0");
        assert_eq!(Expr::lit_f64(-2.0).to_string(), "-2.0");
        assert_eq!(Expr::lit_f64(0.5).to_string(), "0.5");
        assert_eq!(Expr::lit_f64(f64::INFINITY).to_string(), "INFINITY");
    }

    #[test]
    fn negative_operands_do_not_fuse_into_decrement() {
        let expr = -Expr::lit_f64(-2.0);
        assert_eq!(expr.to_string(), "-(-2.0)");
        let expr = Expr::ident("a") * Expr::lit_f64(-2.0);
        assert_eq!(expr.to_string(), "a * -2.0");
        let expr = Expr::lit_f64(-1.0) * Expr::ident("x");
        assert_eq!(expr.to_string(), "-x");
    }

    #[test]
    fn unit_factors_are_dropped() {
        let expr = (Expr::ident("a") + Expr::ident("b")) / Expr::lit_f64(1.0);
        assert_eq!(expr.to_string(), "a + b");
        let sum = Expr::ident("a") + Expr::ident("b");
        let expr = Expr::ident("k") * (sum * Expr::lit_f64(1.0));
        assert_eq!(expr.to_string(), "k * (a + b)");
    }

    #[test]
    fn module_renders_function_with_loop() {
        let mut body = Block::default();
        body.push(Stmt::Pragma("omp parallel for".to_string()));
        body.push(Stmt::for_range(
            "i0",
            Expr::lit_int(1),
            Expr::lit_int(9),
            ForStep::Increment,
            Block::new(vec![Stmt::assign(
                Expr::call_named("AT_u", vec!["u_next".into(), "i0".into()]),
                Expr::lit_f64(0.0),
            )]),
        ));
        let mut module = Module::new();
        module.push(Item::Include("stddef.h".to_string()));
        module.push(Item::define(
            "FD_MIN",
            vec!["a".into(), "b".into()],
            "((a) < (b) ? (a) : (b))",
        ));
        module.push(Item::Function(Function::new(
            "kernel",
            vec![
                Param::new("u", Type::restrict_ptr(Type::Double)),
                Param::new("dt", Type::constant(Type::Double)),
            ],
            Type::Void,
            body,
        )));
        let text = module.to_c();
        assert_eq!(
            text,
            "#include <stddef.h>\n\
             #define FD_MIN(a, b) ((a) < (b) ? (a) : (b))\n\
             \n\
             void kernel(double *restrict u, const double dt)\n\
             {\n\
             \x20   #pragma omp parallel for\n\
             \x20   for (long i0 = 1; i0 < 9; i0++) {\n\
             \x20       AT_u(u_next, i0) = 0.0;\n\
             \x20   }\n\
             }\n"
        );
    }
}
