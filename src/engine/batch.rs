//! Batched group enumeration, the hot loop.
//!
//! One group visits 2*half consecutive points centered on the start
//! point with a single field inversion: the deltas G_i.x - P.x are
//! inverted together, each inverse serves both P + iG and P - iG (same
//! delta-x by curve symmetry), and the last inverse advances the center
//! by 2*half*G for the next group.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::secp::{FieldElement, Point, Scalar, SecpContext, ZeroElement};

use super::predicate::Checker;

/// Scratch buffers sized for one group, reused across every pass.
pub struct BatchBuffers {
    dx: Vec<FieldElement>,
    dx_inv: Vec<FieldElement>,
    pts: Vec<Point>,
}

impl BatchBuffers {
    pub fn new(half: usize) -> Self {
        Self {
            dx: vec![FieldElement::ZERO; half + 1],
            dx_inv: vec![FieldElement::ZERO; half + 1],
            pts: vec![Point::INFINITY; 2 * half],
        }
    }

    /// Compute one group of 2*half points around `start` and advance
    /// `start` to the next group center. The visited points are left in
    /// `self.pts`, index i holding the point at scalar offset
    /// i - half from the center.
    ///
    /// Fails without touching `start` when some delta-x is zero (the
    /// start point collides with a table entry); the caller must rekey.
    pub fn compute_group(
        &mut self,
        ctx: &SecpContext,
        start: &mut Point,
    ) -> Result<(), ZeroElement> {
        let half = ctx.group.half;
        let gn = &ctx.group.gn;
        let two_gn = &ctx.group.two_gn;
        let (sx, sy) = (start.x, start.y);

        for i in 0..half {
            self.dx[i] = gn[i].x.sub(&sx);
        }
        self.dx[half] = two_gn.x.sub(&sx);

        FieldElement::batch_inverse(&self.dx, &mut self.dx_inv)?;

        // Center
        self.pts[half] = *start;

        // P +/- (i+1)G share dx_inv[i]
        for i in 0..half - 1 {
            let (gx, gy) = (gn[i].x, gn[i].y);

            let s = gy.sub(&sy).mul(&self.dx_inv[i]);
            let x3 = s.sqr().sub(&sx).sub(&gx);
            let y3 = gx.sub(&x3).mul(&s).sub(&gy);
            self.pts[half + 1 + i] = Point::new(x3, y3);

            let sn = gy.neg().sub(&sy).mul(&self.dx_inv[i]);
            let xn = sn.sqr().sub(&sx).sub(&gx);
            let yn = gx.sub(&xn).mul(&sn).add(&gy);
            self.pts[half - 1 - i] = Point::new(xn, yn);
        }

        // Edge point P - half*G
        let (gx, gy) = (gn[half - 1].x, gn[half - 1].y);
        let sn = gy.neg().sub(&sy).mul(&self.dx_inv[half - 1]);
        let xn = sn.sqr().sub(&sx).sub(&gx);
        let yn = gx.sub(&xn).mul(&sn).add(&gy);
        self.pts[0] = Point::new(xn, yn);

        // Next center P + 2*half*G
        let s = two_gn.y.sub(&sy).mul(&self.dx_inv[half]);
        let x3 = s.sqr().sub(&sx).sub(&two_gn.x);
        let y3 = two_gn.x.sub(&x3).mul(&s).sub(&two_gn.y);
        *start = Point::new(x3, y3);

        Ok(())
    }

    pub fn points(&self) -> &[Point] {
        &self.pts
    }
}

/// One pass: `iters` consecutive groups. The point at group j, slot i
/// carries scalar base_key + j*group_size + i; every visited point goes
/// through the checker with that signed offset. On return `start` has
/// advanced by iters*group_size*G; the caller advances base_key by the
/// same step.
pub fn run_pass(
    ctx: &SecpContext,
    start: &mut Point,
    base_key: &Scalar,
    iters: usize,
    checker: &Checker,
    bufs: &mut BatchBuffers,
    end_of_search: &AtomicBool,
) -> Result<(), ZeroElement> {
    let group_size = 2 * ctx.group.half;
    for j in 0..iters {
        if end_of_search.load(Ordering::Relaxed) {
            return Ok(());
        }
        bufs.compute_group(ctx, start)?;
        let base_incr = (j * group_size) as i64;
        for (i, p) in bufs.pts.iter().enumerate() {
            checker.check_point(base_key, base_incr + i as i64, p);
        }
    }
    Ok(())
}
