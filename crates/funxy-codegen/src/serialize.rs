//! The versioned binary format for chunks and bundles (`.fbc`).
//!
//! Layout: 4-byte magic `FXBC`, a 1-byte major version (1 = single
//! chunk, 2 = bundle), then the payload. All integers are little-endian;
//! strings are UTF-8 with a `u32` length prefix; floats are IEEE-754
//! binary64; big integers are length-prefixed two's-complement
//! little-endian bytes; rationals are two big integers. Decoding is the
//! strict inverse and rejects truncated or mis-versioned input with a
//! typed error.

use std::collections::BTreeMap;
use std::rc::Rc;

use num_bigint::BigInt;
use num_rational::BigRational;
use thiserror::Error;

use funxy_runtime::chunk::{
    Chunk, CompiledFunction, Const, DictConst, DictEntry, PendingImport, StrPatPart,
};
use funxy_runtime::value::{BitString, CtorFn, CtorValue, Value};

use crate::bundle::{Bundle, BundledModule};

/// File magic.
pub const MAGIC: [u8; 4] = *b"FXBC";
/// Bundle images.
pub const VERSION_BUNDLE: u8 = 2;
/// Single-chunk images.
pub const VERSION_CHUNK: u8 = 1;

/// Encoding failures (non-serializable constants are compiler bugs
/// surfaced as errors rather than panics, since bundles cross process
/// boundaries).
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("cannot serialize a {0} value into a constant pool")]
    UnsupportedValue(&'static str),
}

/// Decoding failures.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("truncated input at byte {0}")]
    UnexpectedEof(usize),
    #[error("bad magic: not a Funxy bytecode file")]
    BadMagic,
    #[error("unsupported bytecode version {0}")]
    BadVersion(u8),
    #[error("invalid tag {tag} for {what} at byte {at}")]
    BadTag { what: &'static str, tag: u8, at: usize },
    #[error("invalid UTF-8 in string at byte {0}")]
    InvalidUtf8(usize),
}

/// A decoded image: either format version.
#[derive(Debug)]
pub enum Image {
    Chunk(Chunk),
    Bundle(Bundle),
}

// ── Public API ─────────────────────────────────────────────────────────

pub fn serialize_bundle(bundle: &Bundle) -> Result<Vec<u8>, EncodeError> {
    let mut w = Writer::new();
    w.bytes_raw(&MAGIC);
    w.u8(VERSION_BUNDLE);
    write_bundle(&mut w, bundle)?;
    Ok(w.finish())
}

pub fn serialize_chunk(chunk: &Chunk) -> Result<Vec<u8>, EncodeError> {
    let mut w = Writer::new();
    w.bytes_raw(&MAGIC);
    w.u8(VERSION_CHUNK);
    write_chunk(&mut w, chunk)?;
    Ok(w.finish())
}

pub fn deserialize_bundle(bytes: &[u8]) -> Result<Bundle, DecodeError> {
    match deserialize_any(bytes)? {
        Image::Bundle(bundle) => Ok(bundle),
        Image::Chunk(chunk) => {
            // Promote a bare chunk to a trivial bundle.
            Ok(Bundle {
                source_file: chunk.file.clone(),
                main_chunk: chunk,
                ..Bundle::default()
            })
        }
    }
}

/// Accept both a v1 single-chunk image and a v2 bundle.
pub fn deserialize_any(bytes: &[u8]) -> Result<Image, DecodeError> {
    let mut r = Reader::new(bytes);
    let magic = r.take(4)?;
    if magic != MAGIC {
        return Err(DecodeError::BadMagic);
    }
    match r.u8()? {
        VERSION_CHUNK => Ok(Image::Chunk(read_chunk(&mut r)?)),
        VERSION_BUNDLE => Ok(Image::Bundle(read_bundle(&mut r)?)),
        other => Err(DecodeError::BadVersion(other)),
    }
}

// ── Writer ─────────────────────────────────────────────────────────────

struct Writer {
    out: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Writer { out: Vec::new() }
    }

    fn finish(self) -> Vec<u8> {
        self.out
    }

    fn u8(&mut self, v: u8) {
        self.out.push(v);
    }

    fn u16(&mut self, v: u16) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }

    fn i64(&mut self, v: i64) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }

    fn f64(&mut self, v: f64) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }

    fn bytes_raw(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(bytes);
    }

    fn bytes(&mut self, bytes: &[u8]) {
        self.u32(bytes.len() as u32);
        self.bytes_raw(bytes);
    }

    fn str(&mut self, s: &str) {
        self.bytes(s.as_bytes());
    }

    fn opt_str(&mut self, s: &Option<String>) {
        match s {
            Some(s) => {
                self.u8(1);
                self.str(s);
            }
            None => self.u8(0),
        }
    }

    fn str_list(&mut self, items: &[String]) {
        self.u32(items.len() as u32);
        for item in items {
            self.str(item);
        }
    }

    fn big_int(&mut self, v: &BigInt) {
        self.bytes(&v.to_signed_bytes_le());
    }
}

// ── Reader ─────────────────────────────────────────────────────────────

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.pos + n > self.bytes.len() {
            return Err(DecodeError::UnexpectedEof(self.pos));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i64(&mut self) -> Result<i64, DecodeError> {
        let b = self.take(8)?;
        Ok(i64::from_le_bytes(b.try_into().expect("8 bytes")))
    }

    fn f64(&mut self) -> Result<f64, DecodeError> {
        let b = self.take(8)?;
        Ok(f64::from_le_bytes(b.try_into().expect("8 bytes")))
    }

    fn byte_vec(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn str(&mut self) -> Result<String, DecodeError> {
        let at = self.pos;
        let bytes = self.byte_vec()?;
        String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8(at))
    }

    fn opt_str(&mut self) -> Result<Option<String>, DecodeError> {
        match self.u8()? {
            0 => Ok(None),
            _ => Ok(Some(self.str()?)),
        }
    }

    fn str_list(&mut self) -> Result<Vec<String>, DecodeError> {
        let count = self.u32()? as usize;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.str()?);
        }
        Ok(out)
    }

    fn big_int(&mut self) -> Result<BigInt, DecodeError> {
        let bytes = self.byte_vec()?;
        Ok(BigInt::from_signed_bytes_le(&bytes))
    }
}

// ── Chunk ──────────────────────────────────────────────────────────────

fn write_chunk(w: &mut Writer, chunk: &Chunk) -> Result<(), EncodeError> {
    w.str(&chunk.file);

    w.u32(chunk.constants.len() as u32);
    for constant in &chunk.constants {
        write_const(w, constant)?;
    }

    w.bytes(&chunk.code);

    w.u32(chunk.lines.len() as u32);
    for line in &chunk.lines {
        w.u32(*line);
    }

    w.u16(chunk.locals_count);

    w.u32(chunk.pending_imports.len() as u32);
    for import in &chunk.pending_imports {
        write_pending_import(w, import);
    }
    Ok(())
}

fn read_chunk(r: &mut Reader<'_>) -> Result<Chunk, DecodeError> {
    let file = r.str()?;

    let const_count = r.u32()? as usize;
    let mut constants = Vec::with_capacity(const_count);
    for _ in 0..const_count {
        constants.push(read_const(r)?);
    }

    let code = r.byte_vec()?;

    let line_count = r.u32()? as usize;
    let mut lines = Vec::with_capacity(line_count);
    for _ in 0..line_count {
        lines.push(r.u32()?);
    }

    let locals_count = r.u16()?;

    let import_count = r.u32()? as usize;
    let mut pending_imports = Vec::with_capacity(import_count);
    for _ in 0..import_count {
        pending_imports.push(read_pending_import(r)?);
    }

    Ok(Chunk {
        code,
        constants,
        lines,
        locals_count,
        file,
        pending_imports,
    })
}

fn write_pending_import(w: &mut Writer, import: &PendingImport) {
    w.str(&import.path);
    w.opt_str(&import.alias);
    w.str_list(&import.symbols);
    w.str_list(&import.exclude);
    w.u8(u8::from(import.import_all));
}

fn read_pending_import(r: &mut Reader<'_>) -> Result<PendingImport, DecodeError> {
    Ok(PendingImport {
        path: r.str()?,
        alias: r.opt_str()?,
        symbols: r.str_list()?,
        exclude: r.str_list()?,
        import_all: r.u8()? != 0,
    })
}

// ── Constants ──────────────────────────────────────────────────────────

const CONST_VALUE: u8 = 1;
const CONST_STR: u8 = 2;
const CONST_FN: u8 = 3;
const CONST_STR_PAT: u8 = 4;
const CONST_DICT: u8 = 5;

fn write_const(w: &mut Writer, constant: &Const) -> Result<(), EncodeError> {
    match constant {
        Const::Value(value) => {
            w.u8(CONST_VALUE);
            write_value(w, value)
        }
        Const::Str(s) => {
            w.u8(CONST_STR);
            w.str(s);
            Ok(())
        }
        Const::Fn(function) => {
            w.u8(CONST_FN);
            write_function(w, function)
        }
        Const::StrPat(parts) => {
            w.u8(CONST_STR_PAT);
            w.u32(parts.len() as u32);
            for part in parts {
                match part {
                    StrPatPart::Lit(text) => {
                        w.u8(1);
                        w.str(text);
                    }
                    StrPatPart::Capture => w.u8(2),
                }
            }
            Ok(())
        }
        Const::Dict(dict) => {
            w.u8(CONST_DICT);
            w.str(&dict.trait_name);
            w.u32(dict.entries.len() as u32);
            for entry in &dict.entries {
                match entry {
                    DictEntry::Fn(idx) => {
                        w.u8(1);
                        w.u32(*idx);
                    }
                    DictEntry::Native(name) => {
                        w.u8(2);
                        w.str(name);
                    }
                    DictEntry::Default(key) => {
                        w.u8(3);
                        w.str(key);
                    }
                }
            }
            Ok(())
        }
    }
}

fn read_const(r: &mut Reader<'_>) -> Result<Const, DecodeError> {
    let at = r.pos;
    match r.u8()? {
        CONST_VALUE => Ok(Const::Value(read_value(r)?)),
        CONST_STR => Ok(Const::Str(r.str()?)),
        CONST_FN => Ok(Const::Fn(Rc::new(read_function(r)?))),
        CONST_STR_PAT => {
            let count = r.u32()? as usize;
            let mut parts = Vec::with_capacity(count);
            for _ in 0..count {
                let at = r.pos;
                match r.u8()? {
                    1 => parts.push(StrPatPart::Lit(r.str()?)),
                    2 => parts.push(StrPatPart::Capture),
                    tag => {
                        return Err(DecodeError::BadTag { what: "string pattern", tag, at })
                    }
                }
            }
            Ok(Const::StrPat(parts))
        }
        CONST_DICT => {
            let trait_name = r.str()?;
            let count = r.u32()? as usize;
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                let at = r.pos;
                match r.u8()? {
                    1 => entries.push(DictEntry::Fn(r.u32()?)),
                    2 => entries.push(DictEntry::Native(r.str()?)),
                    3 => entries.push(DictEntry::Default(r.str()?)),
                    tag => return Err(DecodeError::BadTag { what: "dictionary", tag, at }),
                }
            }
            Ok(Const::Dict(DictConst { trait_name, entries }))
        }
        tag => Err(DecodeError::BadTag { what: "constant", tag, at }),
    }
}

fn write_function(w: &mut Writer, function: &CompiledFunction) -> Result<(), EncodeError> {
    w.str(&function.name);
    w.u8(function.arity);
    w.u8(function.default_count);
    w.u8(u8::from(function.variadic));
    w.u8(function.upvalue_count);
    write_chunk(w, &function.chunk)
}

fn read_function(r: &mut Reader<'_>) -> Result<CompiledFunction, DecodeError> {
    Ok(CompiledFunction {
        name: r.str()?,
        arity: r.u8()?,
        default_count: r.u8()?,
        variadic: r.u8()? != 0,
        upvalue_count: r.u8()?,
        chunk: read_chunk(r)?,
    })
}

// ── Values ─────────────────────────────────────────────────────────────

const VAL_INT: u8 = 1;
const VAL_BIG_INT: u8 = 2;
const VAL_RATIONAL: u8 = 3;
const VAL_FLOAT: u8 = 4;
const VAL_TRUE: u8 = 5;
const VAL_FALSE: u8 = 6;
const VAL_NIL: u8 = 7;
const VAL_CHAR: u8 = 8;
const VAL_STR: u8 = 9;
const VAL_BYTES: u8 = 10;
const VAL_BITS: u8 = 11;
const VAL_CTOR: u8 = 12;
const VAL_CTOR_FN: u8 = 13;

fn write_value(w: &mut Writer, value: &Value) -> Result<(), EncodeError> {
    match value {
        Value::Int(v) => {
            w.u8(VAL_INT);
            w.i64(*v);
        }
        Value::BigInt(v) => {
            w.u8(VAL_BIG_INT);
            w.big_int(v);
        }
        Value::Rational(v) => {
            w.u8(VAL_RATIONAL);
            w.big_int(v.numer());
            w.big_int(v.denom());
        }
        Value::Float(v) => {
            w.u8(VAL_FLOAT);
            w.f64(*v);
        }
        Value::Bool(true) => w.u8(VAL_TRUE),
        Value::Bool(false) => w.u8(VAL_FALSE),
        Value::Nil => w.u8(VAL_NIL),
        Value::Char(c) => {
            w.u8(VAL_CHAR);
            w.u32(*c as u32);
        }
        Value::Str(s) => {
            w.u8(VAL_STR);
            w.str(s);
        }
        Value::Bytes(bytes) => {
            w.u8(VAL_BYTES);
            w.bytes(bytes);
        }
        Value::Bits(bits) => {
            w.u8(VAL_BITS);
            w.u32(bits.len as u32);
            w.bytes(&bits.data);
        }
        Value::Ctor(c) => {
            w.u8(VAL_CTOR);
            w.str(&c.type_name);
            w.str(&c.name);
            w.u32(c.tag);
            w.u16(c.fields.len() as u16);
            for field in &c.fields {
                write_value(w, field)?;
            }
        }
        Value::CtorFn(c) => {
            w.u8(VAL_CTOR_FN);
            w.str(&c.type_name);
            w.str(&c.name);
            w.u32(c.tag);
            w.u16(c.arity as u16);
        }
        other => return Err(EncodeError::UnsupportedValue(other.type_name())),
    }
    Ok(())
}

fn read_value(r: &mut Reader<'_>) -> Result<Value, DecodeError> {
    let at = r.pos;
    Ok(match r.u8()? {
        VAL_INT => Value::Int(r.i64()?),
        VAL_BIG_INT => Value::BigInt(Rc::new(r.big_int()?)),
        VAL_RATIONAL => {
            let numer = r.big_int()?;
            let denom = r.big_int()?;
            Value::Rational(Rc::new(BigRational::new(numer, denom)))
        }
        VAL_FLOAT => Value::Float(r.f64()?),
        VAL_TRUE => Value::Bool(true),
        VAL_FALSE => Value::Bool(false),
        VAL_NIL => Value::Nil,
        VAL_CHAR => {
            let code = r.u32()?;
            Value::Char(char::from_u32(code).unwrap_or('\u{FFFD}'))
        }
        VAL_STR => Value::string(r.str()?),
        VAL_BYTES => Value::Bytes(Rc::new(r.byte_vec()?)),
        VAL_BITS => {
            let len = r.u32()? as usize;
            let data = r.byte_vec()?;
            Value::Bits(Rc::new(BitString { data, len }))
        }
        VAL_CTOR => {
            let type_name = r.str()?;
            let name = r.str()?;
            let tag = r.u32()?;
            let field_count = r.u16()? as usize;
            let mut fields = Vec::with_capacity(field_count);
            for _ in 0..field_count {
                fields.push(read_value(r)?);
            }
            Value::Ctor(Rc::new(CtorValue {
                type_name: Rc::from(type_name.as_str()),
                name: Rc::from(name.as_str()),
                tag,
                fields,
            }))
        }
        VAL_CTOR_FN => {
            let type_name = r.str()?;
            let name = r.str()?;
            let tag = r.u32()?;
            let arity = r.u16()? as usize;
            Value::CtorFn(Rc::new(CtorFn {
                type_name: Rc::from(type_name.as_str()),
                name: Rc::from(name.as_str()),
                tag,
                arity,
            }))
        }
        tag => return Err(DecodeError::BadTag { what: "value", tag, at }),
    })
}

// ── Bundle ─────────────────────────────────────────────────────────────

fn write_bundle(w: &mut Writer, bundle: &Bundle) -> Result<(), EncodeError> {
    write_chunk(w, &bundle.main_chunk)?;

    w.u32(bundle.modules.len() as u32);
    for (path, module) in &bundle.modules {
        w.str(path);
        write_bundled_module(w, module)?;
    }

    w.u32(bundle.trait_defaults.len() as u32);
    for (key, function) in &bundle.trait_defaults {
        w.str(key);
        write_function(w, function)?;
    }

    w.u32(bundle.resources.len() as u32);
    for (name, data) in &bundle.resources {
        w.str(name);
        w.bytes(data);
    }

    w.str(&bundle.source_file);
    Ok(())
}

fn read_bundle(r: &mut Reader<'_>) -> Result<Bundle, DecodeError> {
    let main_chunk = read_chunk(r)?;

    let module_count = r.u32()? as usize;
    let mut modules = BTreeMap::new();
    for _ in 0..module_count {
        let path = r.str()?;
        modules.insert(path, read_bundled_module(r)?);
    }

    let defaults_count = r.u32()? as usize;
    let mut trait_defaults = BTreeMap::new();
    for _ in 0..defaults_count {
        let key = r.str()?;
        trait_defaults.insert(key, Rc::new(read_function(r)?));
    }

    let resource_count = r.u32()? as usize;
    let mut resources = BTreeMap::new();
    for _ in 0..resource_count {
        let name = r.str()?;
        resources.insert(name, r.byte_vec()?);
    }

    let source_file = r.str()?;

    Ok(Bundle {
        main_chunk,
        modules,
        trait_defaults,
        resources,
        source_file,
    })
}

fn write_bundled_module(w: &mut Writer, module: &BundledModule) -> Result<(), EncodeError> {
    match &module.chunk {
        Some(chunk) => {
            w.u8(1);
            write_chunk(w, chunk)?;
        }
        None => w.u8(0),
    }
    w.u32(module.pending_imports.len() as u32);
    for import in &module.pending_imports {
        write_pending_import(w, import);
    }
    w.str_list(&module.exports);
    w.str(&module.dir);
    w.u8(u8::from(module.is_package_group));
    w.str_list(&module.sub_module_paths);
    w.u32(module.traits.len() as u32);
    for (name, methods) in &module.traits {
        w.str(name);
        w.str_list(methods);
    }
    Ok(())
}

fn read_bundled_module(r: &mut Reader<'_>) -> Result<BundledModule, DecodeError> {
    let chunk = match r.u8()? {
        0 => None,
        _ => Some(read_chunk(r)?),
    };
    let import_count = r.u32()? as usize;
    let mut pending_imports = Vec::with_capacity(import_count);
    for _ in 0..import_count {
        pending_imports.push(read_pending_import(r)?);
    }
    let exports = r.str_list()?;
    let dir = r.str()?;
    let is_package_group = r.u8()? != 0;
    let sub_module_paths = r.str_list()?;
    let trait_count = r.u32()? as usize;
    let mut traits = BTreeMap::new();
    for _ in 0..trait_count {
        let name = r.str()?;
        traits.insert(name, r.str_list()?);
    }
    Ok(BundledModule {
        chunk,
        pending_imports,
        exports,
        dir,
        is_package_group,
        sub_module_paths,
        traits,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use funxy_runtime::chunk::Op;

    fn sample_chunk() -> Chunk {
        let mut chunk = Chunk::new("main.fx");
        let idx = chunk.add_value(Value::Int(42));
        chunk.emit_op(Op::PushConst, 1);
        chunk.emit_u16(idx, 1);
        chunk.add_str("print");
        chunk.add_const(Const::StrPat(vec![
            StrPatPart::Lit("id:".into()),
            StrPatPart::Capture,
        ]));
        chunk.add_const(Const::Dict(DictConst {
            trait_name: "Add".into(),
            entries: vec![DictEntry::Native("add.Int".into())],
        }));
        chunk.emit_op(Op::Halt, 2);
        chunk.pending_imports.push(PendingImport {
            path: "lib/math".into(),
            alias: Some("m".into()),
            symbols: vec!["sqrt".into()],
            exclude: Vec::new(),
            import_all: false,
        });
        chunk
    }

    fn sample_bundle() -> Bundle {
        let mut bundle = Bundle {
            main_chunk: sample_chunk(),
            source_file: "main.fx".into(),
            ..Bundle::default()
        };
        bundle.modules.insert(
            "util".into(),
            BundledModule {
                chunk: Some(sample_chunk()),
                exports: vec!["helper".into()],
                dir: "/proj".into(),
                ..BundledModule::default()
            },
        );
        bundle.resources.insert("data.txt".into(), b"hello".to_vec());
        bundle
    }

    #[test]
    fn bundle_round_trip_is_bit_exact() {
        let bundle = sample_bundle();
        let encoded = serialize_bundle(&bundle).unwrap();
        let decoded = deserialize_bundle(&encoded).unwrap();
        let re_encoded = serialize_bundle(&decoded).unwrap();
        assert_eq!(encoded, re_encoded, "round trip must be bit-exact");
    }

    #[test]
    fn chunk_round_trip() {
        let chunk = sample_chunk();
        let encoded = serialize_chunk(&chunk).unwrap();
        match deserialize_any(&encoded).unwrap() {
            Image::Chunk(decoded) => {
                assert_eq!(decoded.code, chunk.code);
                assert_eq!(decoded.lines, chunk.lines);
                assert_eq!(decoded.file, chunk.file);
                assert_eq!(decoded.pending_imports, chunk.pending_imports);
            }
            Image::Bundle(_) => panic!("expected a chunk image"),
        }
    }

    #[test]
    fn bad_magic_is_rejected() {
        let err = deserialize_any(b"NOPE\x02rest").unwrap_err();
        assert!(matches!(err, DecodeError::BadMagic));
    }

    #[test]
    fn bad_version_is_rejected() {
        let mut bytes = MAGIC.to_vec();
        bytes.push(9);
        let err = deserialize_any(&bytes).unwrap_err();
        assert!(matches!(err, DecodeError::BadVersion(9)));
    }

    #[test]
    fn truncated_input_is_rejected() {
        let bundle = sample_bundle();
        let encoded = serialize_bundle(&bundle).unwrap();
        let truncated = &encoded[..encoded.len() / 2];
        assert!(deserialize_any(truncated).is_err());
    }

    #[test]
    fn values_round_trip() {
        let values = vec![
            Value::Int(-7),
            Value::BigInt(Rc::new(BigInt::from(1) << 100)),
            Value::Rational(Rc::new(BigRational::new(3.into(), 2.into()))),
            Value::Float(12.56),
            Value::Bool(true),
            Value::Nil,
            Value::Char('λ'),
            Value::string("hi"),
            Value::Bytes(Rc::new(vec![1, 2, 3])),
            Value::Bits(Rc::new(BitString { data: vec![0b1010_0000], len: 4 })),
            Value::ok(Value::Int(3)),
        ];
        for value in values {
            let mut w = Writer::new();
            write_value(&mut w, &value).unwrap();
            let bytes = w.finish();
            let mut r = Reader::new(&bytes);
            let back = read_value(&mut r).unwrap();
            assert!(
                funxy_runtime::values_equal(&value, &back),
                "{value} did not round-trip"
            );
        }
    }
}
