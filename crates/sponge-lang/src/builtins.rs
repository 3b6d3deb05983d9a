//! Builtin functions, methods and modules.

use std::cmp::Ordering;
use std::rc::Rc;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::error::{ErrorKind, RuntimeError};
use crate::graphics::{DrawCommand, TurtleCommand};
use crate::interp::{Interpreter, RResult, binary_op, compare_values, err, require_hashable};
use crate::value::{FileHandle, FileMode, Value, dict_insert, dict_lookup, format_float};
use crate::ast::BinOp;

const BUILTINS: &[&str] = &[
    "print",
    "input",
    "len",
    "str",
    "int",
    "float",
    "bool",
    "range",
    "abs",
    "min",
    "max",
    "sum",
    "round",
    "sorted",
    "list",
    "tuple",
    "dict",
    "open",
    "enumerate",
    "zip",
    "reversed",
    "chr",
    "ord",
    "any",
    "all",
    "format",
    "repr",
    "is_key_down",
    "play_sound",
];

const CORE_MODULES: &[&str] = &["time", "os", "turtle", "canvas"];

/// Modules that exist only after `install-deps`.
pub const PACKAGES: &[&str] = &["random", "math"];

const TIME_MEMBERS: &[&str] = &["sleep"];
const OS_MEMBERS: &[&str] = &["system"];
const TURTLE_MEMBERS: &[&str] = &[
    "Turtle",
    "forward",
    "fd",
    "backward",
    "back",
    "bk",
    "left",
    "lt",
    "right",
    "rt",
    "setheading",
    "seth",
    "goto",
    "setposition",
    "setpos",
    "penup",
    "pu",
    "up",
    "pendown",
    "pd",
    "down",
    "pensize",
    "width",
    "pencolor",
    "fillcolor",
    "color",
    "circle",
    "begin_fill",
    "end_fill",
    "speed",
    "hideturtle",
    "ht",
    "showturtle",
    "st",
    "mode",
    "reset",
    "done",
    "mainloop",
];
const CANVAS_MEMBERS: &[&str] = &[
    "fill_rect",
    "stroke_rect",
    "clear_rect",
    "move_to",
    "line_to",
    "fill_style",
    "stroke_style",
    "line_width",
    "begin_path",
    "close_path",
    "stroke",
    "fill",
    "arc",
    "fill_text",
    "clear",
];
const RANDOM_MEMBERS: &[&str] = &[
    "randint",
    "random",
    "choice",
    "shuffle",
    "seed",
    "uniform",
    "randrange",
];
const MATH_MEMBERS: &[&str] = &[
    "sqrt", "floor", "ceil", "sin", "cos", "tan", "atan2", "radians", "degrees", "fabs", "pow",
    "hypot", "log", "exp", "pi", "e", "inf",
];

const STR_METHODS: &[&str] = &[
    "upper",
    "lower",
    "strip",
    "lstrip",
    "rstrip",
    "split",
    "join",
    "replace",
    "startswith",
    "endswith",
    "find",
    "count",
    "format",
    "isdigit",
    "isalpha",
    "title",
    "capitalize",
];
const LIST_METHODS: &[&str] = &[
    "append", "pop", "insert", "remove", "index", "extend", "sort", "reverse", "count", "clear",
    "copy",
];
const DICT_METHODS: &[&str] = &["get", "keys", "values", "items", "pop", "clear", "copy"];
const FILE_METHODS: &[&str] = &["read", "readline", "readlines", "write", "close"];

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

pub fn is_core_module(name: &str) -> bool {
    CORE_MODULES.contains(&name)
}

pub fn is_package_module(name: &str) -> bool {
    PACKAGES.contains(&name)
}

pub fn module_members(module: &str) -> &'static [&'static str] {
    match module {
        "time" => TIME_MEMBERS,
        "os" => OS_MEMBERS,
        "turtle" => TURTLE_MEMBERS,
        "canvas" => CANVAS_MEMBERS,
        "random" => RANDOM_MEMBERS,
        "math" => MATH_MEMBERS,
        _ => &[],
    }
}

pub fn module_attr(module: &str, name: &str) -> Option<Value> {
    if module == "math" {
        match name {
            "pi" => return Some(Value::Float(std::f64::consts::PI)),
            "e" => return Some(Value::Float(std::f64::consts::E)),
            "inf" => return Some(Value::Float(f64::INFINITY)),
            _ => {}
        }
    }
    module_members(module)
        .contains(&name)
        .then(|| Value::builtin(&format!("{module}.{name}")))
}

pub fn has_method(value: &Value, name: &str) -> bool {
    let table: &[&str] = match value {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::File(_) => FILE_METHODS,
        Value::Turtle(_) => {
            return TURTLE_MEMBERS.contains(&name)
                && !matches!(name, "Turtle" | "mode" | "done" | "mainloop");
        }
        _ => return false,
    };
    table.contains(&name)
}

// ---- argument helpers --------------------------------------------------

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> RResult<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("exactly {min}")
        } else if args.len() < min {
            format!("at least {min}")
        } else {
            format!("at most {max}")
        };
        let plural = if min == max && min == 1 { "" } else { "s" };
        return err(
            ErrorKind::TypeError,
            format!(
                "{name}() takes {expected} argument{plural} ({} given)",
                args.len()
            ),
        );
    }
    Ok(())
}

fn no_kwargs(name: &str, kwargs: &[(String, Value)]) -> RResult<()> {
    match kwargs.first() {
        Some((key, _)) => err(
            ErrorKind::TypeError,
            format!("{name}() got an unexpected keyword argument '{key}'"),
        ),
        None => Ok(()),
    }
}

fn take_kwarg(kwargs: &mut Vec<(String, Value)>, key: &str) -> Option<Value> {
    let idx = kwargs.iter().position(|(k, _)| k == key)?;
    Some(kwargs.remove(idx).1)
}

fn num(name: &str, value: &Value) -> RResult<f64> {
    value.as_f64().ok_or_else(|| {
        RuntimeError::new(
            ErrorKind::TypeError,
            format!(
                "{name}() argument must be a number, not '{}'",
                value.type_name()
            ),
        )
    })
}

fn int_arg(value: &Value) -> RResult<i64> {
    value.as_int().ok_or_else(|| {
        RuntimeError::new(
            ErrorKind::TypeError,
            format!(
                "'{}' object cannot be interpreted as an integer",
                value.type_name()
            ),
        )
    })
}

fn str_arg(name: &str, value: &Value) -> RResult<Rc<str>> {
    match value {
        Value::Str(s) => Ok(Rc::clone(s)),
        other => err(
            ErrorKind::TypeError,
            format!(
                "{name}() argument must be str, not {}",
                other.type_name()
            ),
        ),
    }
}

fn usize_from(i: i64) -> usize {
    usize::try_from(i.max(0)).unwrap_or(usize::MAX)
}

fn sort_values(
    interp: &mut Interpreter<'_>,
    items: &mut Vec<Value>,
    key: Option<Value>,
    reverse: bool,
) -> RResult<()> {
    let keys = match &key {
        Some(Value::None) | None => items.clone(),
        Some(f) => {
            let mut keys = Vec::with_capacity(items.len());
            for item in items.iter() {
                keys.push(interp.call(f, vec![item.clone()], Vec::new())?);
            }
            keys
        }
    };
    let mut order: Vec<usize> = (0..items.len()).collect();
    let mut failure = None;
    order.sort_by(|&a, &b| match compare_values(&keys[a], &keys[b]) {
        Some(ord) => ord,
        None => {
            failure.get_or_insert_with(|| {
                RuntimeError::new(
                    ErrorKind::TypeError,
                    format!(
                        "'<' not supported between instances of '{}' and '{}'",
                        keys[a].type_name(),
                        keys[b].type_name()
                    ),
                )
            });
            Ordering::Equal
        }
    });
    if let Some(e) = failure {
        return Err(e);
    }
    if reverse {
        order.reverse();
    }
    let sorted: Vec<Value> = order.into_iter().map(|i| items[i].clone()).collect();
    *items = sorted;
    Ok(())
}

fn extreme(
    interp: &mut Interpreter<'_>,
    name: &str,
    args: Vec<Value>,
    want: Ordering,
) -> RResult<Value> {
    let items = if args.len() == 1 {
        interp.iterate(&args[0])?
    } else {
        args
    };
    let mut iter = items.into_iter();
    let Some(mut best) = iter.next() else {
        return err(
            ErrorKind::ValueError,
            format!("{name}() arg is an empty sequence"),
        );
    };
    for item in iter {
        match compare_values(&item, &best) {
            Some(ord) if ord == want => best = item,
            Some(_) => {}
            None => {
                return err(
                    ErrorKind::TypeError,
                    format!(
                        "'{}' not supported between instances of '{}' and '{}'",
                        if want == Ordering::Less { "<" } else { ">" },
                        item.type_name(),
                        best.type_name()
                    ),
                );
            }
        }
    }
    Ok(best)
}

fn round_value(value: &Value, digits: Option<i64>) -> RResult<Value> {
    match (value, digits) {
        (v, None) if v.as_int().is_some() => Ok(Value::Int(v.as_int().unwrap_or_default())),
        (Value::Float(f), None) => {
            if !f.is_finite() {
                return err(
                    ErrorKind::OverflowError,
                    "cannot convert float infinity to integer",
                );
            }
            Ok(Value::Int(f.round_ties_even() as i64))
        }
        (v, Some(_)) if v.as_int().is_some() => Ok(Value::Int(v.as_int().unwrap_or_default())),
        (Value::Float(f), Some(n)) if n >= 0 => {
            let places = usize_from(n);
            let text = format!("{f:.places$}");
            Ok(Value::Float(text.parse().unwrap_or(*f)))
        }
        (Value::Float(f), Some(n)) => {
            let scale = 10f64.powi(i32::try_from(-n).unwrap_or(i32::MAX));
            Ok(Value::Float((f / scale).round_ties_even() * scale))
        }
        (other, _) => err(
            ErrorKind::TypeError,
            format!(
                "type {} doesn't define __round__ method",
                other.type_name()
            ),
        ),
    }
}

fn parse_int(text: &str) -> RResult<Value> {
    let trimmed = text.trim();
    trimmed.parse::<i64>().map(Value::Int).map_err(|_| {
        RuntimeError::new(
            ErrorKind::ValueError,
            format!("invalid literal for int() with base 10: {}", Value::str(text).repr()),
        )
    })
}

fn parse_float(text: &str) -> RResult<Value> {
    let trimmed = text.trim();
    trimmed.parse::<f64>().map(Value::Float).map_err(|_| {
        RuntimeError::new(
            ErrorKind::ValueError,
            format!("could not convert string to float: {}", Value::str(text).repr()),
        )
    })
}

// ---- builtin dispatch --------------------------------------------------

pub fn call_builtin(
    interp: &mut Interpreter<'_>,
    name: &str,
    mut args: Vec<Value>,
    mut kwargs: Vec<(String, Value)>,
) -> RResult<Value> {
    if let Some((module, member)) = name.split_once('.') {
        return call_module(interp, module, member, args, kwargs);
    }
    match name {
        "print" => {
            let sep = match take_kwarg(&mut kwargs, "sep") {
                None | Some(Value::None) => " ".to_string(),
                Some(v) => v.py_str(),
            };
            let end = match take_kwarg(&mut kwargs, "end") {
                None | Some(Value::None) => "\n".to_string(),
                Some(v) => v.py_str(),
            };
            take_kwarg(&mut kwargs, "flush");
            no_kwargs(name, &kwargs)?;
            let mut text = args
                .iter()
                .map(Value::py_str)
                .collect::<Vec<_>>()
                .join(&sep);
            text.push_str(&end);
            interp.host.write(&text)?;
            Ok(Value::None)
        }
        "input" => {
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 0, 1)?;
            if let Some(prompt) = args.first() {
                let prompt = prompt.py_str();
                if !prompt.is_empty() {
                    interp.host.write(&prompt)?;
                }
            }
            let line = interp.host.read_line()?;
            interp.check_interrupt()?;
            Ok(Value::str(line))
        }
        "len" => {
            arity(name, &args, 1, 1)?;
            let n = match &args[0] {
                Value::Str(s) => s.chars().count(),
                Value::List(l) => l.borrow().len(),
                Value::Tuple(t) => t.len(),
                Value::Dict(d) => d.borrow().len(),
                other => {
                    return err(
                        ErrorKind::TypeError,
                        format!("object of type '{}' has no len()", other.type_name()),
                    );
                }
            };
            Ok(Value::Int(i64::try_from(n).unwrap_or(i64::MAX)))
        }
        "str" => {
            arity(name, &args, 0, 1)?;
            Ok(Value::str(args.first().map(Value::py_str).unwrap_or_default()))
        }
        "repr" => {
            arity(name, &args, 1, 1)?;
            Ok(Value::str(args[0].repr()))
        }
        "int" => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::Int(0)),
                Some(Value::Str(s)) => parse_int(s),
                Some(Value::Float(f)) => {
                    if f.is_finite() {
                        Ok(Value::Int(f.trunc() as i64))
                    } else {
                        err(
                            ErrorKind::ValueError,
                            "cannot convert float NaN or infinity to integer",
                        )
                    }
                }
                Some(v) => int_arg(v).map(Value::Int).map_err(|_| {
                    RuntimeError::new(
                        ErrorKind::TypeError,
                        format!(
                            "int() argument must be a string or a number, not '{}'",
                            v.type_name()
                        ),
                    )
                }),
            }
        }
        "float" => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::Float(0.0)),
                Some(Value::Str(s)) => parse_float(s),
                Some(v) => num(name, v).map(Value::Float),
            }
        }
        "bool" => {
            arity(name, &args, 0, 1)?;
            Ok(Value::Bool(args.first().is_some_and(Value::truthy)))
        }
        "range" => {
            arity(name, &args, 1, 3)?;
            let ints = args.iter().map(int_arg).collect::<RResult<Vec<_>>>()?;
            let (start, stop, step) = match ints.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => (0, 0, 1),
            };
            if step == 0 {
                return err(ErrorKind::ValueError, "range() arg 3 must not be zero");
            }
            let (start, stop, step) = (i128::from(start), i128::from(stop), i128::from(step));
            let span = if step > 0 {
                (stop - start + step - 1) / step
            } else {
                (start - stop - step - 1) / -step
            };
            if span > 10_000_000 {
                return err(ErrorKind::OverflowError, "range too large");
            }
            let span = usize::try_from(span.max(0)).unwrap_or(0);
            let mut out = Vec::with_capacity(span);
            let mut i = start;
            for _ in 0..span {
                // Every element lies between start and stop, both i64.
                out.push(Value::Int(i as i64));
                i += step;
            }
            Ok(Value::list(out))
        }
        "abs" => {
            arity(name, &args, 1, 1)?;
            match &args[0] {
                Value::Float(f) => Ok(Value::Float(f.abs())),
                v => int_arg(v)
                    .map_err(|_| {
                        RuntimeError::new(
                            ErrorKind::TypeError,
                            format!("bad operand type for abs(): '{}'", v.type_name()),
                        )
                    })?
                    .checked_abs()
                    .map(Value::Int)
                    .ok_or_else(|| RuntimeError::new(ErrorKind::OverflowError, "integer overflow")),
            }
        }
        "min" => {
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 1, usize::MAX)?;
            extreme(interp, name, args, Ordering::Less)
        }
        "max" => {
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 1, usize::MAX)?;
            extreme(interp, name, args, Ordering::Greater)
        }
        "sum" => {
            arity(name, &args, 1, 2)?;
            let mut total = args.get(1).cloned().unwrap_or(Value::Int(0));
            for item in interp.iterate(&args[0])? {
                total = binary_op(BinOp::Add, &total, &item)?;
            }
            Ok(total)
        }
        "round" => {
            arity(name, &args, 1, 2)?;
            let digits = match args.get(1) {
                None | Some(Value::None) => None,
                Some(v) => Some(int_arg(v)?),
            };
            round_value(&args[0], digits)
        }
        "sorted" => {
            arity(name, &args, 1, 1)?;
            let reverse = take_kwarg(&mut kwargs, "reverse").is_some_and(|v| v.truthy());
            let key = take_kwarg(&mut kwargs, "key");
            no_kwargs(name, &kwargs)?;
            let mut items = interp.iterate(&args[0])?;
            sort_values(interp, &mut items, key, reverse)?;
            Ok(Value::list(items))
        }
        "list" => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::list(Vec::new())),
                Some(v) => Ok(Value::list(interp.iterate(v)?)),
            }
        }
        "tuple" => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::tuple(Vec::new())),
                Some(v) => Ok(Value::tuple(interp.iterate(v)?)),
            }
        }
        "dict" => {
            arity(name, &args, 0, 1)?;
            let mut pairs = Vec::new();
            if let Some(source) = args.first() {
                for item in interp.iterate(source)? {
                    let kv = interp.iterate(&item)?;
                    let [k, v] = <[Value; 2]>::try_from(kv).map_err(|_| {
                        RuntimeError::new(
                            ErrorKind::ValueError,
                            "dictionary update sequence element has wrong length",
                        )
                    })?;
                    require_hashable(&k)?;
                    dict_insert(&mut pairs, k, v);
                }
            }
            for (k, v) in kwargs {
                dict_insert(&mut pairs, Value::str(k), v);
            }
            Ok(Value::dict(pairs))
        }
        "enumerate" => {
            arity(name, &args, 1, 2)?;
            let start = match args.get(1).or(take_kwarg(&mut kwargs, "start").as_ref()) {
                Some(v) => int_arg(v)?,
                None => 0,
            };
            let items = interp.iterate(&args[0])?;
            Ok(Value::list(
                items
                    .into_iter()
                    .zip(start..)
                    .map(|(v, i)| Value::tuple(vec![Value::Int(i), v]))
                    .collect(),
            ))
        }
        "zip" => {
            let mut columns = Vec::with_capacity(args.len());
            for arg in &args {
                columns.push(interp.iterate(arg)?);
            }
            let len = columns.iter().map(Vec::len).min().unwrap_or(0);
            Ok(Value::list(
                (0..len)
                    .map(|i| Value::tuple(columns.iter().map(|c| c[i].clone()).collect()))
                    .collect(),
            ))
        }
        "reversed" => {
            arity(name, &args, 1, 1)?;
            let mut items = interp.iterate(&args[0])?;
            items.reverse();
            Ok(Value::list(items))
        }
        "chr" => {
            arity(name, &args, 1, 1)?;
            let code = int_arg(&args[0])?;
            u32::try_from(code)
                .ok()
                .and_then(char::from_u32)
                .map(|c| Value::str(c.to_string()))
                .ok_or_else(|| RuntimeError::new(ErrorKind::ValueError, "chr() arg not in range(0x110000)"))
        }
        "ord" => {
            arity(name, &args, 1, 1)?;
            let s = str_arg(name, &args[0])?;
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(Value::Int(i64::from(u32::from(c)))),
                _ => err(
                    ErrorKind::TypeError,
                    format!(
                        "ord() expected a character, but string of length {} found",
                        s.chars().count()
                    ),
                ),
            }
        }
        "any" | "all" => {
            arity(name, &args, 1, 1)?;
            let items = interp.iterate(&args[0])?;
            Ok(Value::Bool(if name == "any" {
                items.iter().any(Value::truthy)
            } else {
                items.iter().all(Value::truthy)
            }))
        }
        "format" => {
            arity(name, &args, 1, 2)?;
            let spec = match args.get(1) {
                Some(v) => str_arg(name, v)?.to_string(),
                None => String::new(),
            };
            Ok(Value::str(format_value(&args[0], &spec)?))
        }
        "open" => {
            arity(name, &args, 1, 2)?;
            let path = str_arg(name, &args[0])?;
            let mode = match args.get(1).or(take_kwarg(&mut kwargs, "mode").as_ref()) {
                Some(v) => str_arg(name, v)?.to_string(),
                None => "r".to_string(),
            };
            open_file(interp, &path, &mode)
        }
        "is_key_down" => {
            arity(name, &args, 1, 1)?;
            let code = match &args[0] {
                Value::Str(s) if s.chars().count() == 1 => {
                    s.chars().next().map_or(0, |c| i64::from(u32::from(c)))
                }
                v => int_arg(v)?,
            };
            let down = u8::try_from(code).is_ok_and(|c| interp.host.key_down(c));
            Ok(Value::Bool(down))
        }
        "play_sound" => {
            arity(name, &args, 1, 1)?;
            interp.host.audio(&args[0].py_str())?;
            Ok(Value::None)
        }
        other => err(
            ErrorKind::NameError,
            format!("name '{other}' is not defined"),
        ),
    }
}

fn open_file(interp: &mut Interpreter<'_>, path: &str, mode: &str) -> RResult<Value> {
    let mode = match mode.trim_end_matches('t') {
        "r" => FileMode::Read,
        "w" => FileMode::Write,
        "a" => FileMode::Append,
        other => return err(ErrorKind::ValueError, format!("invalid mode: '{other}'")),
    };
    let fs = interp.host.fs();
    let snapshot = match mode {
        FileMode::Read => match fs.read(path) {
            Some(text) => text.to_string(),
            None => {
                return err(
                    ErrorKind::FileNotFoundError,
                    format!("[Errno 2] No such file or directory: '{path}'"),
                );
            }
        },
        FileMode::Write => {
            fs.write(path, "");
            String::new()
        }
        FileMode::Append => {
            if !fs.exists(path) {
                fs.write(path, "");
            }
            String::new()
        }
    };
    Ok(Value::File(Rc::new(std::cell::RefCell::new(FileHandle {
        path: path.to_string(),
        mode,
        snapshot,
        pos: 0,
        closed: false,
    }))))
}

// ---- modules -----------------------------------------------------------

fn call_module(
    interp: &mut Interpreter<'_>,
    module: &str,
    member: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> RResult<Value> {
    let qualified = format!("{module}.{member}");
    match module {
        "time" => {
            arity(&qualified, &args, 1, 1)?;
            let secs = num(&qualified, &args[0])?;
            if secs < 0.0 {
                return err(ErrorKind::ValueError, "sleep length must be non-negative");
            }
            interp.host.sleep(secs)?;
            interp.check_interrupt()?;
            Ok(Value::None)
        }
        "os" => {
            arity(&qualified, &args, 1, 1)?;
            let cmd = args[0].py_str();
            if matches!(cmd.trim(), "cls" | "clear") {
                interp.host.clear_screen()?;
            }
            Ok(Value::Int(0))
        }
        "turtle" => match member {
            "Turtle" => {
                let id = interp.next_turtle;
                interp.next_turtle += 1;
                Ok(Value::Turtle(id))
            }
            "done" | "mainloop" => Ok(Value::None),
            "mode" if args.is_empty() => Ok(Value::str("standard")),
            _ => turtle_call(interp, 0, member, args, kwargs),
        },
        "canvas" => {
            no_kwargs(&qualified, &kwargs)?;
            let command = canvas_command(&qualified, member, &args)?;
            interp.host.draw(vec![command])?;
            interp.check_interrupt()?;
            Ok(Value::None)
        }
        "random" => random_call(interp, &qualified, member, args),
        "math" => math_call(&qualified, member, &args),
        _ => err(
            ErrorKind::AttributeError,
            format!("module '{module}' has no attribute '{member}'"),
        ),
    }
}

fn color_arg(args: &[Value]) -> RResult<String> {
    let channels = match args {
        [Value::Str(s)] => return Ok(s.to_string()),
        [Value::Tuple(_) | Value::List(_)] => match &args[0] {
            Value::Tuple(t) => t.to_vec(),
            Value::List(l) => l.borrow().clone(),
            _ => Vec::new(),
        },
        [r, g, b] => vec![r.clone(), g.clone(), b.clone()],
        _ => {
            return err(ErrorKind::ValueError, "bad color arguments");
        }
    };
    if channels.len() != 3 {
        return err(ErrorKind::ValueError, "bad color sequence");
    }
    let scaled = channels.iter().any(|c| matches!(c, Value::Float(_)));
    let mut parts = Vec::with_capacity(3);
    for c in &channels {
        let v = num("color", c)?;
        let v = if scaled { (v * 255.0).round() } else { v };
        parts.push(format!("{}", v.clamp(0.0, 255.0) as u8));
    }
    Ok(format!("rgb({})", parts.join(",")))
}

fn speed_value(value: &Value) -> RResult<f64> {
    match value {
        Value::Str(s) => match s.as_ref() {
            "fastest" => Ok(0.0),
            "fast" => Ok(10.0),
            "normal" => Ok(6.0),
            "slow" => Ok(3.0),
            "slowest" => Ok(1.0),
            other => err(ErrorKind::ValueError, format!("bad speed: '{other}'")),
        },
        v => num("speed", v),
    }
}

fn turtle_commands(name: &str, args: &[Value]) -> RResult<Vec<TurtleCommand>> {
    let one = |args: &[Value]| -> RResult<f64> {
        arity(name, args, 1, 1)?;
        num(name, &args[0])
    };
    let cmd = match name {
        "forward" | "fd" => TurtleCommand::Forward { value: one(args)? },
        "backward" | "back" | "bk" => TurtleCommand::Backward { value: one(args)? },
        "left" | "lt" => TurtleCommand::Left { value: one(args)? },
        "right" | "rt" => TurtleCommand::Right { value: one(args)? },
        "setheading" | "seth" => TurtleCommand::Setheading { value: one(args)? },
        "goto" | "setposition" | "setpos" => {
            let (x, y) = match args {
                [x, y] => (num(name, x)?, num(name, y)?),
                [Value::Tuple(t)] if t.len() == 2 => (num(name, &t[0])?, num(name, &t[1])?),
                _ => return err(ErrorKind::TypeError, format!("{name}() expects x and y")),
            };
            TurtleCommand::Setposition { x, y }
        }
        "penup" | "pu" | "up" => TurtleCommand::Penup,
        "pendown" | "pd" | "down" => TurtleCommand::Pendown,
        "pensize" | "width" => TurtleCommand::Pensize { value: one(args)? },
        "pencolor" => TurtleCommand::Pencolor {
            value: color_arg(args)?,
        },
        "fillcolor" => TurtleCommand::Fillcolor {
            value: color_arg(args)?,
        },
        "color" => {
            return match args {
                [pen, fill] => Ok(vec![
                    TurtleCommand::Pencolor {
                        value: color_arg(std::slice::from_ref(pen))?,
                    },
                    TurtleCommand::Fillcolor {
                        value: color_arg(std::slice::from_ref(fill))?,
                    },
                ]),
                _ => {
                    let value = color_arg(args)?;
                    Ok(vec![
                        TurtleCommand::Pencolor {
                            value: value.clone(),
                        },
                        TurtleCommand::Fillcolor { value },
                    ])
                }
            };
        }
        "circle" => {
            arity(name, args, 1, 2)?;
            TurtleCommand::Circle {
                radius: num(name, &args[0])?,
                extent: match args.get(1) {
                    Some(v) => num(name, v)?,
                    None => 360.0,
                },
            }
        }
        "begin_fill" => TurtleCommand::BeginFill,
        "end_fill" => TurtleCommand::EndFill,
        "speed" => {
            arity(name, args, 1, 1)?;
            TurtleCommand::Speed {
                value: speed_value(&args[0])?,
            }
        }
        "hideturtle" | "ht" => TurtleCommand::Hideturtle,
        "showturtle" | "st" => TurtleCommand::Showturtle,
        "mode" => {
            arity(name, args, 1, 1)?;
            let value = args[0].py_str();
            if value != "standard" && value != "logo" {
                return err(ErrorKind::ValueError, format!("No turtle-graphics mode {value}"));
            }
            TurtleCommand::Mode { value }
        }
        "reset" => TurtleCommand::Reset,
        other => {
            return err(
                ErrorKind::AttributeError,
                format!("'Turtle' object has no attribute '{other}'"),
            );
        }
    };
    Ok(vec![cmd])
}

fn turtle_call(
    interp: &mut Interpreter<'_>,
    id: u32,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> RResult<Value> {
    no_kwargs(name, &kwargs)?;
    for command in turtle_commands(name, &args)? {
        interp.host.turtle(id, command)?;
        interp.check_interrupt()?;
    }
    Ok(Value::None)
}

fn canvas_command(qualified: &str, member: &str, args: &[Value]) -> RResult<DrawCommand> {
    let nums = |n: usize| -> RResult<Vec<f64>> {
        arity(qualified, args, n, n)?;
        args.iter().map(|a| num(qualified, a)).collect()
    };
    let rect = |v: Vec<f64>| (v[0], v[1], v[2], v[3]);
    Ok(match member {
        "fill_rect" => {
            let (x, y, width, height) = rect(nums(4)?);
            DrawCommand::FillRect {
                x,
                y,
                width,
                height,
            }
        }
        "stroke_rect" => {
            let (x, y, width, height) = rect(nums(4)?);
            DrawCommand::StrokeRect {
                x,
                y,
                width,
                height,
            }
        }
        "clear_rect" => {
            let (x, y, width, height) = rect(nums(4)?);
            DrawCommand::ClearRect {
                x,
                y,
                width,
                height,
            }
        }
        "move_to" => {
            let v = nums(2)?;
            DrawCommand::MoveTo { x: v[0], y: v[1] }
        }
        "line_to" => {
            let v = nums(2)?;
            DrawCommand::LineTo { x: v[0], y: v[1] }
        }
        "fill_style" => {
            arity(qualified, args, 1, 1)?;
            DrawCommand::FillStyle {
                color: color_arg(args)?,
            }
        }
        "stroke_style" => {
            arity(qualified, args, 1, 1)?;
            DrawCommand::StrokeStyle {
                color: color_arg(args)?,
            }
        }
        "line_width" => DrawCommand::LineWidth { value: nums(1)?[0] },
        "begin_path" => DrawCommand::BeginPath,
        "close_path" => DrawCommand::ClosePath,
        "stroke" => DrawCommand::Stroke,
        "fill" => DrawCommand::Fill,
        "arc" => {
            arity(qualified, args, 5, 6)?;
            let v = args[..5]
                .iter()
                .map(|a| num(qualified, a))
                .collect::<RResult<Vec<_>>>()?;
            DrawCommand::Arc {
                x: v[0],
                y: v[1],
                radius: v[2],
                start_angle: v[3],
                end_angle: v[4],
                counterclockwise: args.get(5).is_some_and(Value::truthy),
            }
        }
        "fill_text" => {
            arity(qualified, args, 3, 3)?;
            DrawCommand::FillText {
                text: args[0].py_str(),
                x: num(qualified, &args[1])?,
                y: num(qualified, &args[2])?,
            }
        }
        "clear" => DrawCommand::Reset,
        other => {
            return err(
                ErrorKind::AttributeError,
                format!("module 'canvas' has no attribute '{other}'"),
            );
        }
    })
}

fn seed_from(value: &Value) -> u64 {
    match value {
        Value::Int(i) => *i as u64,
        other => other
            .py_str()
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325_u64, |h, b| {
                (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
            }),
    }
}

fn random_call(
    interp: &mut Interpreter<'_>,
    qualified: &str,
    member: &str,
    args: Vec<Value>,
) -> RResult<Value> {
    match member {
        "random" => {
            arity(qualified, &args, 0, 0)?;
            Ok(Value::Float(interp.rng.random::<f64>()))
        }
        "uniform" => {
            arity(qualified, &args, 2, 2)?;
            let (a, b) = (num(qualified, &args[0])?, num(qualified, &args[1])?);
            Ok(Value::Float(a + (b - a) * interp.rng.random::<f64>()))
        }
        "randint" => {
            arity(qualified, &args, 2, 2)?;
            let (a, b) = (int_arg(&args[0])?, int_arg(&args[1])?);
            if a > b {
                return err(
                    ErrorKind::ValueError,
                    format!("empty range for randrange() ({a}, {}, {})", b + 1, b + 1 - a),
                );
            }
            Ok(Value::Int(interp.rng.random_range(a..=b)))
        }
        "randrange" => {
            arity(qualified, &args, 1, 2)?;
            let (a, b) = match args.as_slice() {
                [stop] => (0, int_arg(stop)?),
                [start, stop] => (int_arg(start)?, int_arg(stop)?),
                _ => (0, 0),
            };
            if a >= b {
                return err(ErrorKind::ValueError, "empty range for randrange()");
            }
            Ok(Value::Int(interp.rng.random_range(a..b)))
        }
        "choice" => {
            arity(qualified, &args, 1, 1)?;
            let items = interp.iterate(&args[0])?;
            if items.is_empty() {
                return err(ErrorKind::IndexError, "Cannot choose from an empty sequence");
            }
            let idx = interp.rng.random_range(0..items.len());
            Ok(items[idx].clone())
        }
        "shuffle" => {
            arity(qualified, &args, 1, 1)?;
            let Value::List(items) = &args[0] else {
                return err(
                    ErrorKind::TypeError,
                    format!("'{}' object does not support item assignment", args[0].type_name()),
                );
            };
            let mut items = items.borrow_mut();
            for i in (1..items.len()).rev() {
                let j = interp.rng.random_range(0..=i);
                items.swap(i, j);
            }
            Ok(Value::None)
        }
        "seed" => {
            arity(qualified, &args, 0, 1)?;
            interp.rng = match args.first() {
                Some(v) => SmallRng::seed_from_u64(seed_from(v)),
                None => SmallRng::from_os_rng(),
            };
            Ok(Value::None)
        }
        other => err(
            ErrorKind::AttributeError,
            format!("module 'random' has no attribute '{other}'"),
        ),
    }
}

fn math_call(qualified: &str, member: &str, args: &[Value]) -> RResult<Value> {
    let domain = || RuntimeError::new(ErrorKind::ValueError, "math domain error");
    match member {
        "floor" | "ceil" => {
            arity(qualified, args, 1, 1)?;
            if let Some(i) = args[0].as_int() {
                return Ok(Value::Int(i));
            }
            let x = num(qualified, &args[0])?;
            if !x.is_finite() {
                return err(
                    ErrorKind::OverflowError,
                    "cannot convert float infinity to integer",
                );
            }
            let r = if member == "floor" { x.floor() } else { x.ceil() };
            Ok(Value::Int(r as i64))
        }
        "pow" | "atan2" | "hypot" => {
            arity(qualified, args, 2, 2)?;
            let (a, b) = (num(qualified, &args[0])?, num(qualified, &args[1])?);
            Ok(Value::Float(match member {
                "pow" => a.powf(b),
                "atan2" => a.atan2(b),
                _ => a.hypot(b),
            }))
        }
        "log" => {
            arity(qualified, args, 1, 2)?;
            let x = num(qualified, &args[0])?;
            if x <= 0.0 {
                return Err(domain());
            }
            match args.get(1) {
                Some(base) => Ok(Value::Float(x.ln() / num(qualified, base)?.ln())),
                None => Ok(Value::Float(x.ln())),
            }
        }
        _ => {
            arity(qualified, args, 1, 1)?;
            let x = num(qualified, &args[0])?;
            let r = match member {
                "sqrt" => {
                    if x < 0.0 {
                        return Err(domain());
                    }
                    x.sqrt()
                }
                "sin" => x.sin(),
                "cos" => x.cos(),
                "tan" => x.tan(),
                "radians" => x.to_radians(),
                "degrees" => x.to_degrees(),
                "fabs" => x.abs(),
                "exp" => x.exp(),
                other => {
                    return err(
                        ErrorKind::AttributeError,
                        format!("module 'math' has no attribute '{other}'"),
                    );
                }
            };
            Ok(Value::Float(r))
        }
    }
}

// ---- methods -----------------------------------------------------------

pub fn call_method(
    interp: &mut Interpreter<'_>,
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> RResult<Value> {
    match receiver {
        Value::Str(s) => str_method(interp, s, name, args, kwargs),
        Value::List(_) => list_method(interp, receiver, name, args, kwargs),
        Value::Dict(_) => {
            no_kwargs(name, &kwargs)?;
            dict_method(receiver, name, &args)
        }
        Value::File(_) => {
            no_kwargs(name, &kwargs)?;
            file_method(interp, receiver, name, &args)
        }
        Value::Turtle(id) => turtle_call(interp, *id, name, args, kwargs),
        other => err(
            ErrorKind::AttributeError,
            format!("'{}' object has no attribute '{name}'", other.type_name()),
        ),
    }
}

fn str_method(
    interp: &mut Interpreter<'_>,
    s: &Rc<str>,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> RResult<Value> {
    if name == "format" {
        return Ok(Value::str(format_template(s, &args, &kwargs)?));
    }
    no_kwargs(name, &kwargs)?;
    let chars_arg = |args: &[Value]| -> RResult<Option<Vec<char>>> {
        match args.first() {
            None | Some(Value::None) => Ok(None),
            Some(v) => Ok(Some(str_arg(name, v)?.chars().collect())),
        }
    };
    match name {
        "upper" => Ok(Value::str(s.to_uppercase())),
        "lower" => Ok(Value::str(s.to_lowercase())),
        "title" => {
            let mut out = String::with_capacity(s.len());
            let mut prev_alpha = false;
            for c in s.chars() {
                if prev_alpha {
                    out.extend(c.to_lowercase());
                } else {
                    out.extend(c.to_uppercase());
                }
                prev_alpha = c.is_alphabetic();
            }
            Ok(Value::str(out))
        }
        "capitalize" => {
            let mut chars = s.chars();
            let out: String = match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            };
            Ok(Value::str(out))
        }
        "strip" | "lstrip" | "rstrip" => {
            arity(name, &args, 0, 1)?;
            let set = chars_arg(&args)?;
            let pred = |c: char| match &set {
                Some(set) => set.contains(&c),
                None => c.is_whitespace(),
            };
            let out = match name {
                "strip" => s.trim_matches(pred),
                "lstrip" => s.trim_start_matches(pred),
                _ => s.trim_end_matches(pred),
            };
            Ok(Value::str(out))
        }
        "split" => {
            arity(name, &args, 0, 2)?;
            let max = match args.get(1) {
                Some(v) => int_arg(v)?,
                None => -1,
            };
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::None) => {
                    if max < 0 {
                        s.split_whitespace().map(Value::str).collect()
                    } else {
                        let mut parts = Vec::new();
                        let mut rest = s.trim_start();
                        for _ in 0..max {
                            let Some(idx) = rest.find(char::is_whitespace) else {
                                break;
                            };
                            parts.push(Value::str(&rest[..idx]));
                            rest = rest[idx..].trim_start();
                        }
                        if !rest.is_empty() {
                            parts.push(Value::str(rest));
                        }
                        parts
                    }
                }
                Some(sep) => {
                    let sep = str_arg(name, sep)?;
                    if sep.is_empty() {
                        return err(ErrorKind::ValueError, "empty separator");
                    }
                    if max < 0 {
                        s.split(sep.as_ref()).map(Value::str).collect()
                    } else {
                        s.splitn(usize_from(max) + 1, sep.as_ref())
                            .map(Value::str)
                            .collect()
                    }
                }
            };
            Ok(Value::list(parts))
        }
        "join" => {
            arity(name, &args, 1, 1)?;
            let items = interp.iterate(&args[0])?;
            let mut parts = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                match item {
                    Value::Str(p) => parts.push(p.to_string()),
                    other => {
                        return err(
                            ErrorKind::TypeError,
                            format!(
                                "sequence item {i}: expected str instance, {} found",
                                other.type_name()
                            ),
                        );
                    }
                }
            }
            Ok(Value::str(parts.join(s)))
        }
        "replace" => {
            arity(name, &args, 2, 2)?;
            let old = str_arg(name, &args[0])?;
            let new = str_arg(name, &args[1])?;
            Ok(Value::str(s.replace(old.as_ref(), &new)))
        }
        "startswith" | "endswith" => {
            arity(name, &args, 1, 1)?;
            let prefixes: Vec<Rc<str>> = match &args[0] {
                Value::Tuple(items) => items
                    .iter()
                    .map(|v| str_arg(name, v))
                    .collect::<RResult<_>>()?,
                v => vec![str_arg(name, v)?],
            };
            let hit = prefixes.iter().any(|p| {
                if name == "startswith" {
                    s.starts_with(p.as_ref())
                } else {
                    s.ends_with(p.as_ref())
                }
            });
            Ok(Value::Bool(hit))
        }
        "find" => {
            arity(name, &args, 1, 1)?;
            let needle = str_arg(name, &args[0])?;
            let idx = s
                .find(needle.as_ref())
                .map_or(-1, |byte| s[..byte].chars().count() as i64);
            Ok(Value::Int(idx))
        }
        "count" => {
            arity(name, &args, 1, 1)?;
            let needle = str_arg(name, &args[0])?;
            let n = if needle.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(needle.as_ref()).count()
            };
            Ok(Value::Int(n as i64))
        }
        "isdigit" => Ok(Value::Bool(
            !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()),
        )),
        "isalpha" => Ok(Value::Bool(
            !s.is_empty() && s.chars().all(char::is_alphabetic),
        )),
        other => err(
            ErrorKind::AttributeError,
            format!("'str' object has no attribute '{other}'"),
        ),
    }
}

fn list_method(
    interp: &mut Interpreter<'_>,
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
    mut kwargs: Vec<(String, Value)>,
) -> RResult<Value> {
    let Value::List(list) = receiver else {
        return Ok(Value::None);
    };
    if name == "sort" {
        arity(name, &args, 0, 0)?;
        let reverse = take_kwarg(&mut kwargs, "reverse").is_some_and(|v| v.truthy());
        let key = take_kwarg(&mut kwargs, "key");
        no_kwargs(name, &kwargs)?;
        let mut items = list.borrow().clone();
        sort_values(interp, &mut items, key, reverse)?;
        *list.borrow_mut() = items;
        return Ok(Value::None);
    }
    no_kwargs(name, &kwargs)?;
    match name {
        "append" => {
            arity(name, &args, 1, 1)?;
            list.borrow_mut().push(args[0].clone());
            Ok(Value::None)
        }
        "extend" => {
            arity(name, &args, 1, 1)?;
            let extra = interp.iterate(&args[0])?;
            list.borrow_mut().extend(extra);
            Ok(Value::None)
        }
        "pop" => {
            arity(name, &args, 0, 1)?;
            let mut items = list.borrow_mut();
            if items.is_empty() {
                return err(ErrorKind::IndexError, "pop from empty list");
            }
            let len = items.len() as i64;
            let idx = match args.first() {
                Some(v) => int_arg(v)?,
                None => -1,
            };
            let idx = if idx < 0 { idx + len } else { idx };
            if !(0..len).contains(&idx) {
                return err(ErrorKind::IndexError, "pop index out of range");
            }
            Ok(items.remove(usize_from(idx)))
        }
        "insert" => {
            arity(name, &args, 2, 2)?;
            let mut items = list.borrow_mut();
            let len = items.len() as i64;
            let idx = int_arg(&args[0])?;
            let idx = if idx < 0 { (idx + len).max(0) } else { idx.min(len) };
            items.insert(usize_from(idx), args[1].clone());
            Ok(Value::None)
        }
        "remove" => {
            arity(name, &args, 1, 1)?;
            let mut items = list.borrow_mut();
            match items.iter().position(|v| v.py_eq(&args[0])) {
                Some(idx) => {
                    items.remove(idx);
                    Ok(Value::None)
                }
                None => err(ErrorKind::ValueError, "list.remove(x): x not in list"),
            }
        }
        "index" => {
            arity(name, &args, 1, 1)?;
            match list.borrow().iter().position(|v| v.py_eq(&args[0])) {
                Some(idx) => Ok(Value::Int(idx as i64)),
                None => err(
                    ErrorKind::ValueError,
                    format!("{} is not in list", args[0].repr()),
                ),
            }
        }
        "count" => {
            arity(name, &args, 1, 1)?;
            let n = list.borrow().iter().filter(|v| v.py_eq(&args[0])).count();
            Ok(Value::Int(n as i64))
        }
        "reverse" => {
            list.borrow_mut().reverse();
            Ok(Value::None)
        }
        "clear" => {
            list.borrow_mut().clear();
            Ok(Value::None)
        }
        "copy" => Ok(Value::list(list.borrow().clone())),
        other => err(
            ErrorKind::AttributeError,
            format!("'list' object has no attribute '{other}'"),
        ),
    }
}

fn dict_method(receiver: &Value, name: &str, args: &[Value]) -> RResult<Value> {
    let Value::Dict(dict) = receiver else {
        return Ok(Value::None);
    };
    match name {
        "get" => {
            arity(name, args, 1, 2)?;
            require_hashable(&args[0])?;
            Ok(dict_lookup(&dict.borrow(), &args[0])
                .unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::None)))
        }
        "keys" => Ok(Value::list(
            dict.borrow().iter().map(|(k, _)| k.clone()).collect(),
        )),
        "values" => Ok(Value::list(
            dict.borrow().iter().map(|(_, v)| v.clone()).collect(),
        )),
        "items" => Ok(Value::list(
            dict.borrow()
                .iter()
                .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                .collect(),
        )),
        "pop" => {
            arity(name, args, 1, 2)?;
            let mut pairs = dict.borrow_mut();
            match pairs.iter().position(|(k, _)| k.py_eq(&args[0])) {
                Some(idx) => Ok(pairs.remove(idx).1),
                None => match args.get(1) {
                    Some(default) => Ok(default.clone()),
                    None => err(ErrorKind::KeyError, args[0].repr()),
                },
            }
        }
        "clear" => {
            dict.borrow_mut().clear();
            Ok(Value::None)
        }
        "copy" => Ok(Value::dict(dict.borrow().clone())),
        other => err(
            ErrorKind::AttributeError,
            format!("'dict' object has no attribute '{other}'"),
        ),
    }
}

fn file_method(
    interp: &mut Interpreter<'_>,
    receiver: &Value,
    name: &str,
    args: &[Value],
) -> RResult<Value> {
    let Value::File(handle) = receiver else {
        return Ok(Value::None);
    };
    if name == "close" {
        handle.borrow_mut().closed = true;
        return Ok(Value::None);
    }
    let mut h = handle.borrow_mut();
    if h.closed {
        return err(ErrorKind::ValueError, "I/O operation on closed file.");
    }
    match name {
        "write" => {
            arity(name, args, 1, 1)?;
            if h.mode == FileMode::Read {
                return err(ErrorKind::ValueError, "not writable");
            }
            let text = str_arg(name, &args[0])?;
            interp.host.fs().append(&h.path, &text);
            Ok(Value::Int(text.chars().count() as i64))
        }
        "read" | "readline" | "readlines" => {
            if h.mode != FileMode::Read {
                return err(ErrorKind::ValueError, "not readable");
            }
            let rest = h.snapshot[h.pos..].to_string();
            match name {
                "read" => {
                    h.pos = h.snapshot.len();
                    Ok(Value::str(rest))
                }
                "readline" => {
                    let line = rest.split_inclusive('\n').next().unwrap_or("").to_string();
                    h.pos += line.len();
                    Ok(Value::str(line))
                }
                _ => {
                    h.pos = h.snapshot.len();
                    Ok(Value::list(
                        rest.split_inclusive('\n').map(Value::str).collect(),
                    ))
                }
            }
        }
        other => err(
            ErrorKind::AttributeError,
            format!("'_io.TextIOWrapper' object has no attribute '{other}'"),
        ),
    }
}

// ---- formatting --------------------------------------------------------

struct Spec {
    fill: char,
    align: Option<char>,
    width: usize,
    grouping: bool,
    precision: Option<usize>,
    kind: Option<char>,
}

fn parse_spec(spec: &str) -> RResult<Spec> {
    let chars: Vec<char> = spec.chars().collect();
    let mut i = 0;
    let mut out = Spec {
        fill: ' ',
        align: None,
        width: 0,
        grouping: false,
        precision: None,
        kind: None,
    };
    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
    if chars.len() >= 2 && is_align(chars[1]) {
        out.fill = chars[0];
        out.align = Some(chars[1]);
        i = 2;
    } else if chars.first().copied().is_some_and(is_align) {
        out.align = chars.first().copied();
        i = 1;
    }
    if chars.get(i) == Some(&'0') {
        out.fill = '0';
        out.align.get_or_insert('=');
        i += 1;
    }
    let start = i;
    while chars.get(i).is_some_and(char::is_ascii_digit) {
        i += 1;
    }
    let width: String = chars[start..i].iter().collect();
    out.width = width.parse().unwrap_or(0);
    if chars.get(i) == Some(&',') {
        out.grouping = true;
        i += 1;
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        let start = i;
        while chars.get(i).is_some_and(char::is_ascii_digit) {
            i += 1;
        }
        let digits: String = chars[start..i].iter().collect();
        out.precision = Some(digits.parse().map_err(|_| {
            RuntimeError::new(ErrorKind::ValueError, "Format specifier missing precision")
        })?);
    }
    if let Some(&c) = chars.get(i) {
        out.kind = Some(c);
        i += 1;
    }
    if i != chars.len() {
        return err(ErrorKind::ValueError, "Invalid format specifier");
    }
    Ok(out)
}

fn group_thousands(digits: &str) -> String {
    let (sign, body) = match digits.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", digits),
    };
    let (int_part, frac) = match body.find('.') {
        Some(idx) => body.split_at(idx),
        None => (body, ""),
    };
    let mut grouped = String::new();
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    format!("{sign}{grouped}{frac}")
}

/// Apply a format-spec mini-language string (`>8.2f`, `,d`, `^10`) to a value.
pub fn format_value(value: &Value, spec: &str) -> RResult<String> {
    let spec = parse_spec(spec)?;
    let numeric = value.as_f64().is_some() && !matches!(value, Value::Bool(_));
    let unknown = |code: char| {
        RuntimeError::new(
            ErrorKind::ValueError,
            format!(
                "Unknown format code '{code}' for object of type '{}'",
                value.type_name()
            ),
        )
    };
    let mut body = match spec.kind {
        Some('f' | 'F') => {
            let x = value.as_f64().ok_or_else(|| unknown('f'))?;
            format!("{x:.prec$}", prec = spec.precision.unwrap_or(6))
        }
        Some('%') => {
            let x = value.as_f64().ok_or_else(|| unknown('%'))?;
            format!("{:.prec$}%", x * 100.0, prec = spec.precision.unwrap_or(6))
        }
        Some('e') => {
            let x = value.as_f64().ok_or_else(|| unknown('e'))?;
            let s = format!("{x:.prec$e}", prec = spec.precision.unwrap_or(6));
            match s.split_once('e') {
                Some((m, exp)) => {
                    let (sign, digits) = match exp.strip_prefix('-') {
                        Some(d) => ('-', d),
                        None => ('+', exp),
                    };
                    format!("{m}e{sign}{digits:0>2}")
                }
                None => s,
            }
        }
        Some('d') => match value {
            Value::Int(i) => i.to_string(),
            Value::Bool(b) => i64::from(*b).to_string(),
            _ => return Err(unknown('d')),
        },
        Some('s') => {
            if numeric {
                return Err(unknown('s'));
            }
            value.py_str()
        }
        Some(other) => return Err(unknown(other)),
        None => match (value, spec.precision) {
            (Value::Float(f), Some(p)) => format!("{f:.p$}"),
            (Value::Str(s), Some(p)) => s.chars().take(p).collect(),
            (Value::Float(f), None) => format_float(*f),
            _ => value.py_str(),
        },
    };
    if spec.grouping && numeric {
        body = group_thousands(&body);
    }
    let len = body.chars().count();
    if len >= spec.width {
        return Ok(body);
    }
    let pad = spec.width - len;
    let fill = |n: usize| std::iter::repeat_n(spec.fill, n).collect::<String>();
    let align = spec.align.unwrap_or(if numeric { '>' } else { '<' });
    Ok(match align {
        '<' => format!("{body}{}", fill(pad)),
        '^' => format!("{}{body}{}", fill(pad / 2), fill(pad - pad / 2)),
        '=' if body.starts_with('-') => format!("-{}{}", fill(pad), &body[1..]),
        _ => format!("{}{body}", fill(pad)),
    })
}

/// `str.format` with `{}`, `{0}`, `{name}` fields and optional specs.
fn format_template(
    template: &str,
    args: &[Value],
    kwargs: &[(String, Value)],
) -> RResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    let mut auto = 0usize;
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => field.push(ch),
                        None => {
                            return err(
                                ErrorKind::ValueError,
                                "expected '}' before end of string",
                            );
                        }
                    }
                }
                let (key, spec) = match field.split_once(':') {
                    Some((k, s)) => (k.to_string(), Some(s.to_string())),
                    None => (field, None),
                };
                let value = if key.is_empty() {
                    let v = args.get(auto).cloned();
                    auto += 1;
                    v
                } else if let Ok(idx) = key.parse::<usize>() {
                    args.get(idx).cloned()
                } else {
                    kwargs.iter().find(|(k, _)| *k == key).map(|(_, v)| v.clone())
                };
                let Some(value) = value else {
                    return if key.is_empty() || key.parse::<usize>().is_ok() {
                        err(
                            ErrorKind::IndexError,
                            "Replacement index out of range for positional args tuple",
                        )
                    } else {
                        err(ErrorKind::KeyError, Value::str(&key).repr())
                    };
                };
                match spec {
                    Some(spec) => out.push_str(&format_value(&value, &spec)?),
                    None => out.push_str(&value.py_str()),
                }
            }
            '}' => {
                return err(
                    ErrorKind::ValueError,
                    "Single '}' encountered in format string",
                );
            }
            c => out.push(c),
        }
    }
    Ok(out)
}
