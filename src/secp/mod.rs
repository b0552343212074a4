//! secp256k1 primitives: field, scalar, affine points, generator tables
//! and the GLV endomorphism constants.

pub mod field;
pub mod scalar;

pub use field::{FieldElement, ZeroElement};
pub use scalar::Scalar;

/// Generator x coordinate
pub const GX: FieldElement = FieldElement::new([
    0x59F2815B16F81798,
    0x029BFCDB2DCE28D9,
    0x55A06295CE870B07,
    0x79BE667EF9DCBBAC,
]);

/// Generator y coordinate
pub const GY: FieldElement = FieldElement::new([
    0x9C47D08FFB10D4B8,
    0xFD17B448A6855419,
    0x5DA4FBFC0E1108A8,
    0x483ADA7726A3C465,
]);

// Endomorphism constants. beta^3 = 1 mod p and lambda^3 = 1 mod n, so
// beta2 = beta^-1 = beta^2 and lambda2 = lambda^-1 = lambda^2.
// Applying (x, y) -> (beta^i * x, y) multiplies the scalar by lambda^i.
pub const BETA: FieldElement = FieldElement::new([
    0xC1396C28719501EE,
    0x9CF0497512F58995,
    0x6E64479EAC3434E9,
    0x7AE96A2B657C0710,
]);

pub const BETA2: FieldElement = FieldElement::new([
    0x3EC693D68E6AFA40,
    0x630FB68AED0A766A,
    0x919BB86153CBCB16,
    0x851695D49A83F8EF,
]);

pub const LAMBDA: Scalar = Scalar::new([
    0xDF02967C1B23BD72,
    0x122E22EA20816678,
    0xA5261C028812645A,
    0x5363AD4CC05C30E0,
]);

pub const LAMBDA2: Scalar = Scalar::new([
    0xE0CFC810B51283CE,
    0xA880B9FC8EC739C2,
    0x5AD9E3FD77ED9BA4,
    0xAC9C52B33FA3CF1F,
]);

/// Affine curve point, or the point at infinity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Point {
    pub x: FieldElement,
    pub y: FieldElement,
    infinity: bool,
}

impl Point {
    pub const INFINITY: Self = Self {
        x: FieldElement::ZERO,
        y: FieldElement::ZERO,
        infinity: true,
    };

    /// The generator G.
    pub const G: Self = Self {
        x: GX,
        y: GY,
        infinity: false,
    };

    #[inline]
    pub const fn new(x: FieldElement, y: FieldElement) -> Self {
        Self {
            x,
            y,
            infinity: false,
        }
    }

    #[inline]
    pub fn is_infinity(&self) -> bool {
        self.infinity
    }

    #[inline]
    pub fn neg(&self) -> Self {
        if self.infinity {
            return *self;
        }
        Self::new(self.x, self.y.neg())
    }

    /// y^2 = x^3 + 7
    pub fn is_on_curve(&self) -> bool {
        if self.infinity {
            return true;
        }
        let y2 = self.y.sqr();
        let x3_plus_7 = self
            .x
            .sqr()
            .mul(&self.x)
            .add(&FieldElement::new([7, 0, 0, 0]));
        y2 == x3_plus_7
    }

    /// Affine addition. Inputs may alias the result; the special cases
    /// (infinity, doubling, inverse pair) are all handled.
    pub fn add_direct(&self, other: &Self) -> Self {
        if self.infinity {
            return *other;
        }
        if other.infinity {
            return *self;
        }
        let (a, b) = (*self, *other);
        if a.x == b.x {
            if a.y == b.y {
                return a.double_direct();
            }
            // x equal, y opposite: vertical line
            return Self::INFINITY;
        }
        let dy = b.y.sub(&a.y);
        let dx_inv = b.x.sub(&a.x).inv();
        let s = dy.mul(&dx_inv);
        let x3 = s.sqr().sub(&a.x).sub(&b.x);
        let y3 = s.mul(&a.x.sub(&x3)).sub(&a.y);
        Self::new(x3, y3)
    }

    /// Affine doubling. The result may alias the input.
    pub fn double_direct(&self) -> Self {
        if self.infinity || self.y.is_zero() {
            return Self::INFINITY;
        }
        let p = *self;
        let x2 = p.x.sqr();
        let num = x2.add(&x2).add(&x2); // 3x^2, a = 0
        let denom_inv = p.y.add(&p.y).inv();
        let s = num.mul(&denom_inv);
        let x3 = s.sqr().sub(&p.x).sub(&p.x);
        let y3 = s.mul(&p.x.sub(&x3)).sub(&p.y);
        Self::new(x3, y3)
    }

    /// Plain double-and-add. Verification-path only; the hot paths go
    /// through the batch engine or [`GMultiplier`].
    pub fn mul(&self, k: &Scalar) -> Self {
        let mut result = Self::INFINITY;
        let mut base = *self;
        for limb in k.d.iter() {
            let mut bits = *limb;
            for _ in 0..64 {
                if bits & 1 == 1 {
                    result = result.add_direct(&base);
                }
                base = base.double_direct();
                bits >>= 1;
            }
        }
        result
    }

    /// Parse a 33-byte compressed or 65-byte uncompressed SEC1 encoding.
    pub fn from_sec1(bytes: &[u8]) -> Option<Self> {
        match bytes.first()? {
            0x02 | 0x03 if bytes.len() == 33 => {
                let x = FieldElement::from_bytes(bytes[1..33].try_into().ok()?);
                let y2 = x.sqr().mul(&x).add(&FieldElement::new([7, 0, 0, 0]));
                let mut y = y2.sqrt()?;
                if y.is_odd() != (bytes[0] == 0x03) {
                    y = y.neg();
                }
                Some(Self::new(x, y))
            }
            0x04 if bytes.len() == 65 => {
                let x = FieldElement::from_bytes(bytes[1..33].try_into().ok()?);
                let y = FieldElement::from_bytes(bytes[33..65].try_into().ok()?);
                let p = Self::new(x, y);
                p.is_on_curve().then_some(p)
            }
            _ => None,
        }
    }

    /// (beta^i * x, y) for i in {1, 2}; same y, scalar multiplied by
    /// lambda^i.
    pub fn endomorphism(&self, i: u8) -> Self {
        match i {
            1 => Self::new(self.x.mul(&BETA), self.y),
            2 => Self::new(self.x.mul(&BETA2), self.y),
            _ => *self,
        }
    }
}

/// Fixed-window multiplier for k*G: 64 windows of 4 bits, 15 precomputed
/// points each. One table build at startup buys ~64 additions per
/// multiplication instead of ~384 for double-and-add.
pub struct GMultiplier {
    // table[w][j] = (j+1) * 2^(4w) * G
    table: Vec<[Point; 15]>,
}

impl GMultiplier {
    pub fn new() -> Self {
        let mut table = Vec::with_capacity(64);
        let mut window_base = Point::G;
        for _ in 0..64 {
            let mut row = [Point::INFINITY; 15];
            let mut acc = window_base;
            for entry in row.iter_mut() {
                *entry = acc;
                acc = acc.add_direct(&window_base);
            }
            table.push(row);
            // next window base = 16 * current
            window_base = acc;
        }
        Self { table }
    }

    pub fn mul(&self, k: &Scalar) -> Point {
        let mut result = Point::INFINITY;
        for w in 0..64 {
            let limb = k.d[w / 16];
            let nibble = ((limb >> ((w % 16) * 4)) & 0xF) as usize;
            if nibble != 0 {
                result = result.add_direct(&self.table[w][nibble - 1]);
            }
        }
        result
    }
}

impl Default for GMultiplier {
    fn default() -> Self {
        Self::new()
    }
}

/// Precomputed generator multiples for the batch engine:
/// `gn[i] = (i+1)*G` for i < half, plus `two_gn = 2*half*G` used to
/// advance a group center to the next group.
pub struct GroupTable {
    pub gn: Vec<Point>,
    pub two_gn: Point,
    pub half: usize,
}

impl GroupTable {
    pub fn new(half: usize) -> Self {
        let mut gn = Vec::with_capacity(half);
        let mut g = Point::G;
        gn.push(g);
        g = g.double_direct();
        gn.push(g);
        for _ in 2..half {
            g = g.add_direct(&Point::G);
            gn.push(g);
        }
        let two_gn = gn[half - 1].double_direct();
        Self { gn, two_gn, half }
    }
}

/// Shared read-only curve context built once at startup.
pub struct SecpContext {
    pub group: GroupTable,
    pub g_mul: GMultiplier,
}

impl SecpContext {
    pub fn new(half: usize) -> Self {
        Self {
            group: GroupTable::new(half),
            g_mul: GMultiplier::new(),
        }
    }

    /// k*G through the windowed table.
    #[inline]
    pub fn compute_public_key(&self, k: &Scalar) -> Point {
        self.g_mul.mul(k)
    }
}
