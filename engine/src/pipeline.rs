//! The pipeline driver: turns an operation-token stream into an ordered
//! list of typed operations (§4.1) and runs them left-to-right against the
//! working volume. Parsing and execution are deliberately split so a
//! caller (the CLI, or a test) can inspect the parsed form before running
//! it.

use crate::dtype::DataType;
use crate::error::{Error, Result};
use crate::filter::ReconstructionFilter;
use crate::kernel::{build_kernel, KernelShape};
use crate::ops::reduce::{self, Axis, Reduce};
use crate::ops::threshold::{self, OtsuMode};
use crate::ops::unary::{self, IndexOrientation};
use crate::ops::{blur, edt, morph, resize, temporal, tensor, tfce};
use crate::volume::{Volume, WorkingType};
use voxmath_kernels::KernelEntry;

/// The output storage type a trailing `-odt` token selects: one step
/// removed from [`DataType`] because it adds the `input` passthrough
/// option ("write back using whatever datatype the volume was originally
/// read as").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputDatatype {
    Explicit(DataType),
    Input,
}

impl OutputDatatype {
    fn parse(token: &str) -> Result<Self> {
        if token.eq_ignore_ascii_case("input") {
            return Ok(OutputDatatype::Input);
        }
        let dt = match token {
            "char" | "uchar" | "uint8" => DataType::Uint8,
            "short" | "int16" => DataType::Int16,
            "ushort" | "uint16" => DataType::Uint16,
            "int" | "int32" => DataType::Int32,
            "uint" | "uint32" => DataType::Uint32,
            "float" | "float32" => DataType::Float32,
            "double" | "float64" => DataType::Float64,
            "schar" | "int8" => DataType::Int8,
            _ => return Err(Error::argument("-odt", format!("unknown output datatype `{token}`"))),
        };
        Ok(OutputDatatype::Explicit(dt))
    }
}

/// One operation token plus its already-typed arguments. A closed
/// enumeration, per §3's "Operation token" invariant: the list is built
/// once by [`parse`] and never mutated by [`execute`].
#[derive(Clone, Debug)]
pub enum Op {
    Blur { sx: f64, sy: f64, sz: f64, width: f64 },
    Unsharp { sx: f64, sy: f64, sz: f64, amount: f64 },
    Edt,
    Kernel(KernelShape),
    DilM,
    DilD,
    DilF,
    DilAll,
    Ero,
    EroF,
    FMedian,
    FMean,
    FMeanU,
    FMeanZero,
    Bptf { hp: f64, lp: f64, demean: bool },
    Bandpass { fs: f64, hp_hz: f64, lp_hz: f64 },
    Detrend,
    Resize { zx: f64, zy: f64, zz: f64, method: i32 },
    Subsamp2 { offc: bool },
    Otsu { mode: i32, exclude_zero: bool, dilated: bool },
    Thr(f64),
    Uthr(f64),
    ThrP(f64),
    UthrP(f64),
    ClampLo(f64),
    ClampHi(f64),
    ClampLoP(f64),
    ClampHiP(f64),
    Reduce { kind: Reduce, percentile: f64 },
    TensorDecomp,
    Tensor2,
    Tfce { h: f64, e: f64, connectivity: u8 },
    TfceSeeded { h: f64, e: f64, connectivity: u8, seed: (usize, usize, usize, usize), tfce_thresh: f64 },
    AddScalar(f64),
    SubScalar(f64),
    MulScalar(f64),
    DivScalar(f64),
    RemScalar(f64),
    MaxScalar(f64),
    MinScalar(f64),
    Power(f64),
    AddVol(Volume),
    SubVol(Volume),
    MulVol(Volume),
    DivVol(Volume),
    MaxVol(Volume),
    MinVol(Volume),
    Mas(Volume),
    Exp,
    Log,
    Floor,
    Round,
    Ceil,
    Trunc,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sqr,
    Sqrt,
    Recip,
    Abs,
    Bin,
    Binv,
    Nan,
    Nanm,
    Rand(Option<u64>),
    Randn(Option<u64>),
    Range,
    Rank,
    RankNorm,
    Ztop,
    Ptoz,
    Pval(Vec<f64>),
    Pval0(Vec<f64>),
    Cpval(Vec<f64>),
    Inm(f64),
    Ing(f64),
    Index(IndexOrientation),
    Edge,
    Dog { sigma1: f64, sigma2: f64 },
    ZeroCrossing,
    C2h,
    H2c,
}

/// The fully parsed pipeline: the working precision, the two volume paths,
/// the optional output datatype, and the ordered operation list.
pub struct ParsedPipeline {
    pub working_type: WorkingType,
    /// Explicit `-p N` thread-count override; per §5/§6 this outranks both
    /// `NIIMATH_THREADS` and the pool's own default when present.
    pub threads: Option<usize>,
    pub input_path: String,
    pub output_path: String,
    pub output_dtype: Option<OutputDatatype>,
    pub ops: Vec<Op>,
}

impl ParsedPipeline {
    /// §4.1's special case: no operation tokens between input and output
    /// means a straight copy-through with no type promotion.
    pub fn is_passthrough(&self) -> bool {
        self.ops.is_empty()
    }
}

struct Cursor<'a> {
    tokens: &'a [String],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<&'a str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn next(&mut self) -> Option<&'a str> {
        let t = self.peek();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn next_str(&mut self, op: &'static str) -> Result<&'a str> {
        self.next().ok_or_else(|| Error::argument(op, "missing argument"))
    }

    fn next_f64(&mut self, op: &'static str) -> Result<f64> {
        let t = self.next_str(op)?;
        t.parse::<f64>().map_err(|_| Error::argument(op, format!("`{t}` is not a number")))
    }

    fn next_i32(&mut self, op: &'static str) -> Result<i32> {
        Ok(self.next_f64(op)? as i32)
    }

    fn next_usize(&mut self, op: &'static str) -> Result<usize> {
        Ok(self.next_f64(op)? as usize)
    }

    fn next_bool(&mut self, op: &'static str) -> Result<bool> {
        Ok(self.next_f64(op)? != 0.0)
    }

    /// Peeks the next token: if it parses as `u64` consume and return it as
    /// an optional seed, otherwise leave the cursor untouched. Used by
    /// `rand`/`randn`, whose seed argument is itself optional.
    fn maybe_seed(&mut self) -> Option<u64> {
        let t = self.peek()?;
        let seed = t.parse::<u64>().ok()?;
        self.next();
        Some(seed)
    }
}

/// A numeric token is a scalar; anything else is a path to load as a
/// second volume — the rule §4.1 states for operations that can take
/// either.
enum ScalarOrVol {
    Scalar(f64),
    Vol(Volume),
}

fn scalar_or_vol(cur: &mut Cursor, op: &'static str, load: &mut dyn FnMut(&str) -> Result<Volume>) -> Result<ScalarOrVol> {
    let t = cur.next_str(op)?;
    match t.parse::<f64>() {
        Ok(v) => Ok(ScalarOrVol::Scalar(v)),
        Err(_) => Ok(ScalarOrVol::Vol(load(t)?)),
    }
}

fn parse_kernel_shape(cur: &mut Cursor, load: &mut dyn FnMut(&str) -> Result<Volume>) -> Result<KernelShape> {
    let shape = cur.next_str("-kernel")?;
    Ok(match shape {
        "box" => KernelShape::Box {
            x: cur.next_usize("-kernel box")?,
            y: cur.next_usize("-kernel box")?,
            z: cur.next_usize("-kernel box")?,
        },
        "sphere" => KernelShape::Sphere { radius_mm: cur.next_f64("-kernel sphere")? },
        "gauss" => KernelShape::Gauss { sigma_mm: cur.next_f64("-kernel gauss")? },
        "2D" => KernelShape::Box { x: 3, y: 3, z: 1 },
        "3D" => KernelShape::Box { x: 3, y: 3, z: 3 },
        "file" => {
            let path = cur.next_str("-kernel file")?;
            KernelShape::Mask(load(path)?)
        }
        other => return Err(Error::argument("-kernel", format!("unknown kernel shape `{other}`"))),
    })
}

fn parse_one_op(tok: &str, cur: &mut Cursor, load: &mut dyn FnMut(&str) -> Result<Volume>) -> Result<Op> {
    let name = tok.trim_start_matches('-');
    Ok(match name {
        "blur" => Op::Blur {
            sx: cur.next_f64("-blur")?,
            sy: cur.next_f64("-blur")?,
            sz: cur.next_f64("-blur")?,
            width: cur.next_f64("-blur")?,
        },
        "unsharp" => Op::Unsharp {
            sx: cur.next_f64("-unsharp")?,
            sy: cur.next_f64("-unsharp")?,
            sz: cur.next_f64("-unsharp")?,
            amount: cur.next_f64("-unsharp")?,
        },
        "edt" => Op::Edt,
        "kernel" => Op::Kernel(parse_kernel_shape(cur, load)?),
        "dilM" => Op::DilM,
        "dilD" => Op::DilD,
        "dilF" => Op::DilF,
        "dilall" => Op::DilAll,
        "ero" => Op::Ero,
        "eroF" => Op::EroF,
        "fmedian" => Op::FMedian,
        "fmean" => Op::FMean,
        "fmeanu" => Op::FMeanU,
        "fmeanzero" => Op::FMeanZero,
        "bptf" => Op::Bptf {
            hp: cur.next_f64("-bptf")?,
            lp: cur.next_f64("-bptf")?,
            demean: cur.next_bool("-bptf")?,
        },
        "bandpass" => Op::Bandpass {
            fs: cur.next_f64("-bandpass")?,
            hp_hz: cur.next_f64("-bandpass")?,
            lp_hz: cur.next_f64("-bandpass")?,
        },
        "detrend" => Op::Detrend,
        "resize" => Op::Resize {
            zx: cur.next_f64("-resize")?,
            zy: cur.next_f64("-resize")?,
            zz: cur.next_f64("-resize")?,
            method: cur.next_i32("-resize")?,
        },
        "subsamp2" => Op::Subsamp2 { offc: false },
        "subsamp2offc" => Op::Subsamp2 { offc: true },
        "otsu" => Op::Otsu {
            mode: cur.next_i32("-otsu")?,
            exclude_zero: cur.next_bool("-otsu")?,
            dilated: cur.next_bool("-otsu")?,
        },
        "thr" => Op::Thr(cur.next_f64("-thr")?),
        "uthr" => Op::Uthr(cur.next_f64("-uthr")?),
        "thrp" => Op::ThrP(cur.next_f64("-thrp")?),
        "uthrp" => Op::UthrP(cur.next_f64("-uthrp")?),
        "clamp" => Op::ClampLo(cur.next_f64("-clamp")?),
        "uclamp" => Op::ClampHi(cur.next_f64("-uclamp")?),
        "clampp" => Op::ClampLoP(cur.next_f64("-clampp")?),
        "uclampp" => Op::ClampHiP(cur.next_f64("-uclampp")?),
        "Tmean" => Op::Reduce { kind: Reduce::Mean, percentile: 0.0 },
        "Tstd" => Op::Reduce { kind: Reduce::Std, percentile: 0.0 },
        "Tmax" => Op::Reduce { kind: Reduce::Max, percentile: 0.0 },
        "Tmaxn" => Op::Reduce { kind: Reduce::MaxIndex, percentile: 0.0 },
        "Tmin" => Op::Reduce { kind: Reduce::Min, percentile: 0.0 },
        "Tmedian" => Op::Reduce { kind: Reduce::Median, percentile: 0.0 },
        "Tperc" => Op::Reduce { kind: Reduce::Perc, percentile: cur.next_f64("-Tperc")? },
        "Tar1" => Op::Reduce { kind: Reduce::Ar1, percentile: 0.0 },
        "tensor_decomp" => Op::TensorDecomp,
        "tensor_2" => Op::Tensor2,
        "tfce" => Op::Tfce {
            h: cur.next_f64("-tfce")?,
            e: cur.next_f64("-tfce")?,
            connectivity: cur.next_usize("-tfce")? as u8,
        },
        "tfceS" => Op::TfceSeeded {
            h: cur.next_f64("-tfceS")?,
            e: cur.next_f64("-tfceS")?,
            connectivity: cur.next_usize("-tfceS")? as u8,
            seed: (
                cur.next_usize("-tfceS")?,
                cur.next_usize("-tfceS")?,
                cur.next_usize("-tfceS")?,
                cur.next_usize("-tfceS")?,
            ),
            tfce_thresh: cur.next_f64("-tfceS")?,
        },
        "add" => match scalar_or_vol(cur, "-add", load)? {
            ScalarOrVol::Scalar(s) => Op::AddScalar(s),
            ScalarOrVol::Vol(v) => Op::AddVol(v),
        },
        "sub" => match scalar_or_vol(cur, "-sub", load)? {
            ScalarOrVol::Scalar(s) => Op::SubScalar(s),
            ScalarOrVol::Vol(v) => Op::SubVol(v),
        },
        "mul" => match scalar_or_vol(cur, "-mul", load)? {
            ScalarOrVol::Scalar(s) => Op::MulScalar(s),
            ScalarOrVol::Vol(v) => Op::MulVol(v),
        },
        "div" => match scalar_or_vol(cur, "-div", load)? {
            ScalarOrVol::Scalar(s) => Op::DivScalar(s),
            ScalarOrVol::Vol(v) => Op::DivVol(v),
        },
        "rem" | "mod" => Op::RemScalar(cur.next_f64("-rem")?),
        "max" => match scalar_or_vol(cur, "-max", load)? {
            ScalarOrVol::Scalar(s) => Op::MaxScalar(s),
            ScalarOrVol::Vol(v) => Op::MaxVol(v),
        },
        "min" => match scalar_or_vol(cur, "-min", load)? {
            ScalarOrVol::Scalar(s) => Op::MinScalar(s),
            ScalarOrVol::Vol(v) => Op::MinVol(v),
        },
        "mas" => {
            let path = cur.next_str("-mas")?;
            Op::Mas(load(path)?)
        }
        "power" => Op::Power(cur.next_f64("-power")?),
        "exp" => Op::Exp,
        "log" => Op::Log,
        "floor" => Op::Floor,
        "round" => Op::Round,
        "ceil" => Op::Ceil,
        "trunc" => Op::Trunc,
        "sin" => Op::Sin,
        "cos" => Op::Cos,
        "tan" => Op::Tan,
        "asin" => Op::Asin,
        "acos" => Op::Acos,
        "atan" => Op::Atan,
        "sqr" => Op::Sqr,
        "sqrt" => Op::Sqrt,
        "recip" => Op::Recip,
        "abs" => Op::Abs,
        "bin" => Op::Bin,
        "binv" => Op::Binv,
        "nan" => Op::Nan,
        "nanm" => Op::Nanm,
        "rand" => Op::Rand(cur.maybe_seed()),
        "randn" => Op::Randn(cur.maybe_seed()),
        "range" => Op::Range,
        "rank" => Op::Rank,
        "ranknorm" => Op::RankNorm,
        "ztop" => Op::Ztop,
        "ptoz" => Op::Ptoz,
        "pval" => Op::Pval(load(cur.next_str("-pval")?)?.into_data()),
        "pval0" => Op::Pval0(load(cur.next_str("-pval0")?)?.into_data()),
        "cpval" => Op::Cpval(load(cur.next_str("-cpval")?)?.into_data()),
        "inm" => Op::Inm(cur.next_f64("-inm")?),
        "ing" => Op::Ing(cur.next_f64("-ing")?),
        "index" => {
            let orientation = match cur.peek() {
                Some("never") => {
                    cur.next();
                    IndexOrientation::Never
                }
                _ => IndexOrientation::AffineDependent,
            };
            Op::Index(orientation)
        }
        "edge" => Op::Edge,
        "dog" => Op::Dog {
            sigma1: cur.next_f64("-dog")?,
            sigma2: cur.next_f64("-dog")?,
        },
        "zero_crossing" => Op::ZeroCrossing,
        "c2h" => Op::C2h,
        "h2c" => Op::H2c,
        other => return Err(Error::UnknownOperation(other.to_string())),
    })
}

/// Parses `tokens` (the argument list following the program name) into a
/// [`ParsedPipeline`]. `load` is the caller's volume-loading collaborator,
/// invoked for every second-volume argument (binary ops, `-kernel file`,
/// the permutation-test null distributions).
pub fn parse(tokens: &[String], load: &mut dyn FnMut(&str) -> Result<Volume>) -> Result<ParsedPipeline> {
    let mut cur = Cursor { tokens, pos: 0 };
    let mut working_type = WorkingType::Double;
    let mut threads = None;
    loop {
        match cur.peek() {
            Some("-dt") => {
                cur.next();
                let t = cur.next_str("-dt")?;
                working_type = match t {
                    "float" => WorkingType::Single,
                    "double" => WorkingType::Double,
                    _ => return Err(Error::argument("-dt", format!("unknown working type `{t}`"))),
                };
            }
            Some("-p") => {
                cur.next();
                threads = Some(cur.next_usize("-p")?);
            }
            _ => break,
        }
    }
    let input_path = cur.next_str("pipeline")?.to_string();

    let mut ops = Vec::new();
    let mut output_path: Option<String> = None;
    let mut output_dtype = None;
    loop {
        let tok = match cur.peek() {
            Some(t) => t,
            None => break,
        };
        if tok == "-odt" {
            cur.next();
            let t = cur.next_str("-odt")?;
            output_dtype = Some(OutputDatatype::parse(t)?);
            if cur.peek().is_some() {
                return Err(Error::argument("-odt", "trailing tokens after output datatype"));
            }
            break;
        } else if tok.starts_with('-') {
            if output_path.is_some() {
                return Err(Error::argument("pipeline", "operation token found after the output path"));
            }
            cur.next();
            let op = parse_one_op(tok, &mut cur, load)?;
            ops.push(op);
        } else {
            if output_path.is_some() {
                return Err(Error::argument("pipeline", "more than one bare output path"));
            }
            output_path = Some(cur.next().unwrap().to_string());
        }
    }
    let output_path = output_path.ok_or_else(|| Error::argument("pipeline", "missing output path"))?;
    Ok(ParsedPipeline {
        working_type,
        threads,
        input_path,
        output_path,
        output_dtype,
        ops,
    })
}

/// What a pipeline run produces: the mutated working volume plus any
/// extra volumes an operation (currently only `tensor_decomp`) persists
/// alongside it, each tagged with the filename postfix the external
/// saver should insert before the extension.
pub struct PipelineOutput {
    pub volume: Volume,
    pub derived: Vec<(&'static str, Volume)>,
}

/// Runs `ops` against `vol` in order, aborting on the first operation that
/// returns an error. Matches §4.1's "operations fail fast" contract: the
/// caller is expected to free/drop the volume on `Err`, which happens
/// automatically once it goes out of scope.
pub fn execute(mut vol: Volume, ops: &[Op]) -> Result<PipelineOutput> {
    let mut current_kernel: Option<Vec<KernelEntry>> = None;
    let mut derived = Vec::new();

    macro_rules! need_kernel {
        ($op:expr) => {
            current_kernel.as_deref().ok_or_else(|| Error::argument($op, "no -kernel has been set"))?
        };
    }

    for op in ops {
        match op {
            Op::Blur { sx, sy, sz, width } => blur::blur(&mut vol, *sx, *sy, *sz, *width)?,
            Op::Unsharp { sx, sy, sz, amount } => blur::unsharp(&mut vol, *sx, *sy, *sz, *amount)?,
            Op::Edt => edt::edt(&mut vol),
            Op::Kernel(shape) => {
                let spacing = vol.spacing();
                let k = build_kernel(shape, (spacing.0, spacing.1, spacing.2), vol.nx(), vol.ny())?;
                current_kernel = Some(k);
            }
            Op::DilM => morph::dilate_mean(&mut vol, need_kernel!("-dilM")),
            Op::DilD => morph::dilate_max(&mut vol, need_kernel!("-dilD")),
            Op::DilF => morph::dilate_filter(&mut vol, need_kernel!("-dilF")),
            Op::DilAll => morph::dilate_all(&mut vol, need_kernel!("-dilall")),
            Op::Ero => morph::erode(&mut vol, need_kernel!("-ero")),
            Op::EroF => morph::erode_filter(&mut vol, need_kernel!("-eroF")),
            Op::FMedian => morph::median_filter(&mut vol, need_kernel!("-fmedian")),
            Op::FMean => morph::weighted_mean_filter(&mut vol, need_kernel!("-fmean")),
            Op::FMeanU => morph::weighted_sum_filter(&mut vol, need_kernel!("-fmeanu")),
            Op::FMeanZero => morph::mean_zero_filter(&mut vol, need_kernel!("-fmeanzero")),
            Op::Bptf { hp, lp, demean } => temporal::bptf(&mut vol, *hp, *lp, *demean)?,
            Op::Bandpass { fs, hp_hz, lp_hz } => temporal::bandpass(&mut vol, *fs, *hp_hz, *lp_hz)?,
            Op::Detrend => temporal::detrend_linear(&mut vol)?,
            Op::Resize { zx, zy, zz, method } => resize::resize(&mut vol, *zx, *zy, *zz, ReconstructionFilter::from_code(*method))?,
            Op::Subsamp2 { offc } => resize::subsamp2(&mut vol, *offc)?,
            Op::Otsu { mode, exclude_zero, dilated } => {
                if let Some(t) = threshold::otsu_thresholds(vol.data(), OtsuMode::from_code(*mode), *exclude_zero) {
                    threshold::otsu_mask(&mut vol, t, !*dilated, *dilated);
                }
            }
            Op::Thr(t) => unary::thr(&mut vol, *t),
            Op::Uthr(t) => unary::uthr(&mut vol, *t),
            Op::ThrP(p) => unary::thr_percentile(&mut vol, *p),
            Op::UthrP(p) => unary::uthr_percentile(&mut vol, *p),
            Op::ClampLo(lo) => unary::clamp_below(&mut vol, *lo),
            Op::ClampHi(hi) => unary::clamp_above(&mut vol, *hi),
            Op::ClampLoP(p) => unary::clamp_below_percentile(&mut vol, *p),
            Op::ClampHiP(p) => unary::clamp_above_percentile(&mut vol, *p),
            Op::Reduce { kind, percentile } => {
                let (data, nx, ny, nz, nt) = reduce::reduce(&vol, Axis::T, *kind, *percentile)?;
                vol.replace(data, nx, ny, nz, nt)?;
            }
            Op::TensorDecomp => {
                let volumes = tensor::tensor_decomp(&vol)?;
                let names = ["_L1", "_L2", "_L3", "_V1", "_V2", "_V3", "_MD", "_MO", "_FA"];
                let mut iter = volumes.into_iter();
                vol = iter.next().unwrap();
                for (name, v) in names[1..].iter().zip(iter) {
                    derived.push((*name, v));
                }
                // The first derived volume (`_L1`) is also kept as the
                // primary working volume's replacement above; re-tag it so
                // the caller sees all nine consistently postfixed.
                derived.insert(0, (names[0], vol.clone()));
            }
            Op::Tensor2 => tensor::tensor_2(&mut vol)?,
            Op::Tfce { h, e, connectivity } => tfce::tfce(&mut vol, *h, *e, *connectivity),
            Op::TfceSeeded { h, e, connectivity, seed, tfce_thresh } => {
                tfce::tfce_seeded(&mut vol, *h, *e, *connectivity, *seed, *tfce_thresh)
            }
            Op::AddScalar(s) => unary::add_scalar(&mut vol, *s),
            Op::SubScalar(s) => unary::sub_scalar(&mut vol, *s),
            Op::MulScalar(s) => unary::mul_scalar(&mut vol, *s),
            Op::DivScalar(s) => unary::div_scalar(&mut vol, *s),
            Op::RemScalar(s) => unary::rem_scalar(&mut vol, *s),
            Op::MaxScalar(s) => unary::max_scalar(&mut vol, *s),
            Op::MinScalar(s) => unary::min_scalar(&mut vol, *s),
            Op::Power(p) => unary::power(&mut vol, *p),
            Op::AddVol(rhs) => unary::add_vol(&mut vol, rhs)?,
            Op::SubVol(rhs) => unary::sub_vol(&mut vol, rhs)?,
            Op::MulVol(rhs) => unary::mul_vol(&mut vol, rhs)?,
            Op::DivVol(rhs) => unary::div_vol(&mut vol, rhs)?,
            Op::MaxVol(rhs) => unary::max_vol(&mut vol, rhs)?,
            Op::MinVol(rhs) => unary::min_vol(&mut vol, rhs)?,
            Op::Mas(mask) => unary::mask_with(&mut vol, mask)?,
            Op::Exp => unary::exp(&mut vol),
            Op::Log => unary::log(&mut vol),
            Op::Floor => unary::floor(&mut vol),
            Op::Round => unary::round(&mut vol),
            Op::Ceil => unary::ceil(&mut vol),
            Op::Trunc => unary::trunc(&mut vol),
            Op::Sin => unary::sin(&mut vol),
            Op::Cos => unary::cos(&mut vol),
            Op::Tan => unary::tan(&mut vol),
            Op::Asin => unary::asin(&mut vol),
            Op::Acos => unary::acos(&mut vol),
            Op::Atan => unary::atan(&mut vol),
            Op::Sqr => unary::sqr(&mut vol),
            Op::Sqrt => unary::sqrt(&mut vol),
            Op::Recip => unary::recip(&mut vol),
            Op::Abs => unary::abs(&mut vol),
            Op::Bin => unary::bin(&mut vol),
            Op::Binv => unary::binv(&mut vol),
            Op::Nan => unary::nan(&mut vol),
            Op::Nanm => unary::nanm(&mut vol),
            Op::Rand(seed) => unary::rand_uniform(&mut vol, *seed),
            Op::Randn(seed) => unary::rand_normal(&mut vol, *seed),
            Op::Range => {
                unary::range(&vol);
            }
            Op::Rank => unary::rank(&mut vol),
            Op::RankNorm => unary::ranknorm(&mut vol),
            Op::Ztop => unary::ztop(&mut vol),
            Op::Ptoz => unary::ptoz(&mut vol),
            Op::Pval(null) => unary::pval(&mut vol, null)?,
            Op::Pval0(null) => unary::pval0(&mut vol, null)?,
            Op::Cpval(null) => unary::cpval(&mut vol, null)?,
            Op::Inm(target) => unary::inm(&mut vol, *target),
            Op::Ing(target) => unary::ing(&mut vol, *target),
            Op::Index(orientation) => unary::index(&mut vol, *orientation),
            Op::Edge => morph::edge(&mut vol)?,
            Op::Dog { sigma1, sigma2 } => morph::dog(&mut vol, *sigma1, *sigma2)?,
            Op::ZeroCrossing => morph::zero_crossing(&mut vol),
            Op::C2h => threshold::c2h(&mut vol),
            Op::H2c => threshold::h2c(&mut vol),
        }
    }

    Ok(PipelineOutput { volume: vol, derived })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affine::Affine;

    fn tok(s: &str) -> String {
        s.to_string()
    }

    fn no_loader() -> impl FnMut(&str) -> Result<Volume> {
        |p: &str| Err(Error::internal("test-loader", format!("unexpected load of `{p}`")))
    }

    #[test]
    fn parses_dt_and_odt_around_a_simple_op() {
        let tokens: Vec<String> = ["-dt", "float", "in.nii", "-thr", "10", "out.nii", "-odt", "short"]
            .iter()
            .map(|s| tok(s))
            .collect();
        let mut load = no_loader();
        let parsed = parse(&tokens, &mut load).unwrap();
        assert_eq!(parsed.working_type, WorkingType::Single);
        assert_eq!(parsed.input_path, "in.nii");
        assert_eq!(parsed.output_path, "out.nii");
        assert!(matches!(parsed.output_dtype, Some(OutputDatatype::Explicit(DataType::Int16))));
        assert_eq!(parsed.ops.len(), 1);
    }

    #[test]
    fn parses_p_before_or_after_dt() {
        let tokens: Vec<String> = ["-p", "4", "-dt", "float", "in.nii", "out.nii"].iter().map(|s| tok(s)).collect();
        let mut load = no_loader();
        let parsed = parse(&tokens, &mut load).unwrap();
        assert_eq!(parsed.threads, Some(4));
        assert_eq!(parsed.working_type, WorkingType::Single);

        let tokens: Vec<String> = ["-dt", "float", "-p", "4", "in.nii", "out.nii"].iter().map(|s| tok(s)).collect();
        let mut load = no_loader();
        let parsed = parse(&tokens, &mut load).unwrap();
        assert_eq!(parsed.threads, Some(4));
    }

    #[test]
    fn no_ops_is_a_passthrough() {
        let tokens: Vec<String> = ["in.nii", "out.nii"].iter().map(|s| tok(s)).collect();
        let mut load = no_loader();
        let parsed = parse(&tokens, &mut load).unwrap();
        assert!(parsed.is_passthrough());
    }

    #[test]
    fn unknown_operation_is_an_error() {
        let tokens: Vec<String> = ["in.nii", "-bogus", "out.nii"].iter().map(|s| tok(s)).collect();
        let mut load = no_loader();
        assert!(parse(&tokens, &mut load).is_err());
    }

    #[test]
    fn add_with_numeric_argument_is_a_scalar_add() {
        let tokens: Vec<String> = ["in.nii", "-add", "2.5", "out.nii"].iter().map(|s| tok(s)).collect();
        let mut load = no_loader();
        let parsed = parse(&tokens, &mut load).unwrap();
        assert!(matches!(parsed.ops[0], Op::AddScalar(v) if (v - 2.5).abs() < 1e-9));
    }

    #[test]
    fn execute_runs_a_thr_then_bin_pipeline() {
        let data = vec![1.0, 5.0, 9.0, 0.0];
        let vol = Volume::new(data, 4, 1, 1, 1, (1.0, 1.0, 1.0, 1.0), Affine::identity(), WorkingType::Double).unwrap();
        let out = execute(vol, &[Op::Thr(4.0), Op::Bin]).unwrap();
        assert_eq!(out.volume.data(), &[0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn morphological_op_without_kernel_errors() {
        let vol = Volume::zeros(2, 2, 1, 1, WorkingType::Double);
        assert!(execute(vol, &[Op::DilM]).is_err());
    }

    #[test]
    fn kernel_2d_and_3d_shortcuts_parse_as_box_kernels() {
        let tokens: Vec<String> = ["in.nii", "-kernel", "2D", "-dilM", "out.nii"].iter().map(|s| tok(s)).collect();
        let mut load = no_loader();
        let parsed = parse(&tokens, &mut load).unwrap();
        assert!(matches!(parsed.ops[0], Op::Kernel(KernelShape::Box { x: 3, y: 3, z: 1 })));

        let tokens: Vec<String> = ["in.nii", "-kernel", "3D", "-dilM", "out.nii"].iter().map(|s| tok(s)).collect();
        let mut load = no_loader();
        let parsed = parse(&tokens, &mut load).unwrap();
        assert!(matches!(parsed.ops[0], Op::Kernel(KernelShape::Box { x: 3, y: 3, z: 3 })));
    }

    #[test]
    fn kernel_2d_dilm_fills_a_checkerboard() {
        let vol = Volume::new(vec![0.0, 1.0, 1.0, 0.0], 2, 2, 1, 1, (1.0, 1.0, 1.0, 1.0), Affine::identity(), WorkingType::Double).unwrap();
        let out = execute(vol, &[Op::Kernel(KernelShape::Box { x: 3, y: 3, z: 1 }), Op::DilM]).unwrap();
        assert_eq!(out.volume.data(), &[1.0, 1.0, 1.0, 1.0]);
    }
}
