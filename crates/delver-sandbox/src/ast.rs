//! Abstract syntax tree for the sandbox script language.

/// A literal constant.
#[derive(Clone, Debug, PartialEq)]
pub enum Lit {
    /// `null`
    Null,
    /// `true` / `false`
    Bool(bool),
    /// Integer literal.
    Int(i64),
    /// Float literal.
    Float(f64),
    /// String literal.
    Str(String),
}

/// Binary operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `in` (membership)
    In,
    /// `and` (short-circuit)
    And,
    /// `or` (short-circuit)
    Or,
}

/// Unary operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
    /// `-`
    Neg,
    /// `not`
    Not,
}

/// An expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Literal constant.
    Literal(Lit),
    /// Variable reference.
    Name(String),
    /// List display `[a, b]`.
    List(Vec<Expr>),
    /// Map display `{"k": v}`.
    Map(Vec<(Expr, Expr)>),
    /// Unary operation.
    Unary {
        /// Operator.
        op: UnOp,
        /// Operand.
        expr: Box<Expr>,
    },
    /// Binary operation.
    Binary {
        /// Operator.
        op: BinOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// Subscript `target[index]`.
    Index {
        /// Container expression.
        target: Box<Expr>,
        /// Index expression.
        index: Box<Expr>,
    },
    /// Attribute access `target.name`.
    Attr {
        /// Object expression.
        target: Box<Expr>,
        /// Attribute name.
        name: String,
    },
    /// Call with positional and `name=value` keyword arguments.
    Call {
        /// Callee expression.
        callee: Box<Expr>,
        /// Positional arguments.
        args: Vec<Expr>,
        /// Keyword arguments, in source order.
        kwargs: Vec<(String, Expr)>,
    },
}

/// An assignment target.
#[derive(Clone, Debug, PartialEq)]
pub enum Target {
    /// Plain variable.
    Name(String),
    /// Subscript `container[index]`.
    Index {
        /// Container expression.
        target: Box<Expr>,
        /// Index expression.
        index: Box<Expr>,
    },
}

/// A statement.
#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    /// Expression evaluated for effect.
    Expr(Expr),
    /// `target = value`.
    Assign {
        /// Assignment target.
        target: Target,
        /// Value expression.
        value: Expr,
    },
    /// `if` / `elif` chain with optional `else`.
    If {
        /// `(condition, body)` pairs, first match wins.
        branches: Vec<(Expr, Vec<Stmt>)>,
        /// Fallback body.
        else_body: Option<Vec<Stmt>>,
    },
    /// `for var in iterable { body }`.
    For {
        /// Loop variable.
        var: String,
        /// Iterable expression.
        iter: Expr,
        /// Loop body.
        body: Vec<Stmt>,
    },
    /// `while condition { body }`.
    While {
        /// Loop condition.
        cond: Expr,
        /// Loop body.
        body: Vec<Stmt>,
    },
    /// `import name` (dotted allowed).
    Import {
        /// Full dotted module path.
        module: String,
    },
    /// `break`.
    Break,
    /// `continue`.
    Continue,
}
