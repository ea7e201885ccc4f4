// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Deep-space machinery: lunar/solar secular and periodic perturbations and
//! the 12-hour / synchronous resonance integrator. Only orbits with periods
//! of 225 minutes and up come through here.
//!
//! The structure follows the reference decomposition: `dscom` computes the
//! shared lunar/solar geometry at epoch, `dsinit` derives the secular rates
//! and resonance coefficients, `dpper` applies the periodic corrections at
//! each call, and `dspace` advances the resonance integrator in 720-minute
//! steps.

use core::f64::consts::PI;
use libm::{atan2, cos, fabs, fmod, pow, sin, sqrt};

const TWOPI: f64 = 2.0 * PI;

/// Deep-space coefficient block carried by the propagator. Zeroed for
/// near-earth orbits.
#[derive(Clone, Default)]
pub(crate) struct DeepSpace {
    pub irez: i32,
    pub d2201: f64,
    pub d2211: f64,
    pub d3210: f64,
    pub d3222: f64,
    pub d4410: f64,
    pub d4422: f64,
    pub d5220: f64,
    pub d5232: f64,
    pub d5421: f64,
    pub d5433: f64,
    pub dedt: f64,
    pub didt: f64,
    pub dmdt: f64,
    pub dnodt: f64,
    pub domdt: f64,
    pub del1: f64,
    pub del2: f64,
    pub del3: f64,
    pub e3: f64,
    pub ee2: f64,
    pub peo: f64,
    pub pgho: f64,
    pub pho: f64,
    pub pinco: f64,
    pub plo: f64,
    pub se2: f64,
    pub se3: f64,
    pub sgh2: f64,
    pub sgh3: f64,
    pub sgh4: f64,
    pub sh2: f64,
    pub sh3: f64,
    pub si2: f64,
    pub si3: f64,
    pub sl2: f64,
    pub sl3: f64,
    pub sl4: f64,
    pub xfact: f64,
    pub xgh2: f64,
    pub xgh3: f64,
    pub xgh4: f64,
    pub xh2: f64,
    pub xh3: f64,
    pub xi2: f64,
    pub xi3: f64,
    pub xl2: f64,
    pub xl3: f64,
    pub xl4: f64,
    pub xlamo: f64,
    pub zmol: f64,
    pub zmos: f64,
    // Resonance integrator state.
    pub atime: f64,
    pub xli: f64,
    pub xni: f64,
}

/// Common lunar/solar terms produced by [`dscom`] and consumed by
/// [`dsinit`].
#[derive(Clone, Default)]
pub(crate) struct DsCommon {
    pub sinim: f64,
    pub cosim: f64,
    pub emsq: f64,
    pub s1: f64,
    pub s2: f64,
    pub s3: f64,
    pub s4: f64,
    pub s5: f64,
    pub ss1: f64,
    pub ss2: f64,
    pub ss3: f64,
    pub ss4: f64,
    pub ss5: f64,
    pub sz1: f64,
    pub sz3: f64,
    pub sz11: f64,
    pub sz13: f64,
    pub sz21: f64,
    pub sz23: f64,
    pub sz31: f64,
    pub sz33: f64,
    pub z1: f64,
    pub z3: f64,
    pub z11: f64,
    pub z13: f64,
    pub z21: f64,
    pub z23: f64,
    pub z31: f64,
    pub z33: f64,
    pub nm: f64,
    pub em: f64,
}

/// Computes the epoch lunar/solar geometry, filling the periodic
/// coefficients of `ds` and returning the shared terms `dsinit` needs.
pub(crate) fn dscom(
    epoch: f64,
    ep: f64,
    argpp: f64,
    tc: f64,
    inclp: f64,
    nodep: f64,
    np: f64,
    ds: &mut DeepSpace,
) -> DsCommon {
    const ZES: f64 = 0.01675;
    const ZEL: f64 = 0.05490;
    const C1SS: f64 = 2.9864797e-6;
    const C1L: f64 = 4.7968065e-7;
    const ZSINIS: f64 = 0.39785416;
    const ZCOSIS: f64 = 0.91744867;
    const ZCOSGS: f64 = 0.1945905;
    const ZSINGS: f64 = -0.98088458;

    let mut out = DsCommon {
        nm: np,
        em: ep,
        ..DsCommon::default()
    };
    let snodm = sin(nodep);
    let cnodm = cos(nodep);
    let sinomm = sin(argpp);
    let cosomm = cos(argpp);
    out.sinim = sin(inclp);
    out.cosim = cos(inclp);
    out.emsq = out.em * out.em;
    let betasq = 1.0 - out.emsq;
    let rtemsq = sqrt(betasq);

    ds.peo = 0.0;
    ds.pinco = 0.0;
    ds.plo = 0.0;
    ds.pgho = 0.0;
    ds.pho = 0.0;
    let day = epoch + 18261.5 + tc / 1440.0;
    let xnodce = fmod(4.5236020 - 9.2422029e-4 * day, TWOPI);
    let stem = sin(xnodce);
    let ctem = cos(xnodce);
    let zcosil = 0.91375164 - 0.03568096 * ctem;
    let zsinil = sqrt(1.0 - zcosil * zcosil);
    let zsinhl = 0.089683511 * stem / zsinil;
    let zcoshl = sqrt(1.0 - zsinhl * zsinhl);
    let gam = 5.8351514 + 0.0019443680 * day;
    let mut zx = 0.39785416 * stem / zsinil;
    let zy = zcoshl * ctem + 0.91744867 * zsinhl * stem;
    zx = atan2(zx, zy);
    zx = gam + zx - xnodce;
    let zcosgl = cos(zx);
    let zsingl = sin(zx);

    // First pass solar, second pass lunar.
    let mut zcosg = ZCOSGS;
    let mut zsing = ZSINGS;
    let mut zcosi = ZCOSIS;
    let mut zsini = ZSINIS;
    let mut zcosh = cnodm;
    let mut zsinh = snodm;
    let mut cc = C1SS;
    let xnoi = 1.0 / out.nm;

    let mut z2 = 0.0;
    let mut z12 = 0.0;
    let mut z22 = 0.0;
    let mut z32 = 0.0;
    let mut sz2 = 0.0;
    let mut sz12 = 0.0;
    let mut sz22 = 0.0;
    let mut sz32 = 0.0;
    let mut s6 = 0.0;
    let mut s7 = 0.0;
    let mut ss6 = 0.0;
    let mut ss7 = 0.0;

    for lsflg in 1..=2 {
        let a1 = zcosg * zcosh + zsing * zcosi * zsinh;
        let a3 = -zsing * zcosh + zcosg * zcosi * zsinh;
        let a7 = -zcosg * zsinh + zsing * zcosi * zcosh;
        let a8 = zsing * zsini;
        let a9 = zsing * zsinh + zcosg * zcosi * zcosh;
        let a10 = zcosg * zsini;
        let a2 = out.cosim * a7 + out.sinim * a8;
        let a4 = out.cosim * a9 + out.sinim * a10;
        let a5 = -out.sinim * a7 + out.cosim * a8;
        let a6 = -out.sinim * a9 + out.cosim * a10;

        let x1 = a1 * cosomm + a2 * sinomm;
        let x2 = a3 * cosomm + a4 * sinomm;
        let x3 = -a1 * sinomm + a2 * cosomm;
        let x4 = -a3 * sinomm + a4 * cosomm;
        let x5 = a5 * sinomm;
        let x6 = a6 * sinomm;
        let x7 = a5 * cosomm;
        let x8 = a6 * cosomm;

        let z31 = 12.0 * x1 * x1 - 3.0 * x3 * x3;
        z32 = 24.0 * x1 * x2 - 6.0 * x3 * x4;
        let z33 = 12.0 * x2 * x2 - 3.0 * x4 * x4;
        let mut z1 = 3.0 * (a1 * a1 + a2 * a2) + z31 * out.emsq;
        z2 = 6.0 * (a1 * a3 + a2 * a4) + z32 * out.emsq;
        let mut z3 = 3.0 * (a3 * a3 + a4 * a4) + z33 * out.emsq;
        let z11 = -6.0 * a1 * a5 + out.emsq * (-24.0 * x1 * x7 - 6.0 * x3 * x5);
        z12 = -6.0 * (a1 * a6 + a3 * a5)
            + out.emsq * (-24.0 * (x2 * x7 + x1 * x8) - 6.0 * (x3 * x6 + x4 * x5));
        let z13 = -6.0 * a3 * a6 + out.emsq * (-24.0 * x2 * x8 - 6.0 * x4 * x6);
        let z21 = 6.0 * a2 * a5 + out.emsq * (24.0 * x1 * x5 - 6.0 * x3 * x7);
        z22 = 6.0 * (a4 * a5 + a2 * a6)
            + out.emsq * (24.0 * (x2 * x5 + x1 * x6) - 6.0 * (x4 * x7 + x3 * x8));
        let z23 = 6.0 * a4 * a6 + out.emsq * (24.0 * x2 * x6 - 6.0 * x4 * x8);
        z1 = z1 + z1 + betasq * z31;
        z2 = z2 + z2 + betasq * z32;
        z3 = z3 + z3 + betasq * z33;
        let s3 = cc * xnoi;
        let s2 = -0.5 * s3 / rtemsq;
        let s4 = s3 * rtemsq;
        let s1 = -15.0 * out.em * s4;
        let s5 = x1 * x3 + x2 * x4;
        s6 = x2 * x3 + x1 * x4;
        s7 = x2 * x4 - x1 * x3;

        if lsflg == 1 {
            out.ss1 = s1;
            out.ss2 = s2;
            out.ss3 = s3;
            out.ss4 = s4;
            out.ss5 = s5;
            ss6 = s6;
            ss7 = s7;
            out.sz1 = z1;
            sz2 = z2;
            out.sz3 = z3;
            out.sz11 = z11;
            sz12 = z12;
            out.sz13 = z13;
            out.sz21 = z21;
            sz22 = z22;
            out.sz23 = z23;
            out.sz31 = z31;
            sz32 = z32;
            out.sz33 = z33;
            zcosg = zcosgl;
            zsing = zsingl;
            zcosi = zcosil;
            zsini = zsinil;
            zcosh = zcoshl * cnodm + zsinhl * snodm;
            zsinh = snodm * zcoshl - cnodm * zsinhl;
            cc = C1L;
        } else {
            out.s1 = s1;
            out.s2 = s2;
            out.s3 = s3;
            out.s4 = s4;
            out.s5 = s5;
            out.z1 = z1;
            out.z3 = z3;
            out.z11 = z11;
            out.z13 = z13;
            out.z21 = z21;
            out.z23 = z23;
            out.z31 = z31;
            out.z33 = z33;
        }
    }

    ds.zmol = fmod(4.7199672 + 0.22997150 * day - gam, TWOPI);
    ds.zmos = fmod(6.2565837 + 0.017201977 * day, TWOPI);

    // Solar periodic coefficients.
    ds.se2 = 2.0 * out.ss1 * ss6;
    ds.se3 = 2.0 * out.ss1 * ss7;
    ds.si2 = 2.0 * out.ss2 * sz12;
    ds.si3 = 2.0 * out.ss2 * (out.sz13 - out.sz11);
    ds.sl2 = -2.0 * out.ss3 * sz2;
    ds.sl3 = -2.0 * out.ss3 * (out.sz3 - out.sz1);
    ds.sl4 = -2.0 * out.ss3 * (-21.0 - 9.0 * out.emsq) * ZES;
    ds.sgh2 = 2.0 * out.ss4 * sz32;
    ds.sgh3 = 2.0 * out.ss4 * (out.sz33 - out.sz31);
    ds.sgh4 = -18.0 * out.ss4 * ZES;
    ds.sh2 = -2.0 * out.ss2 * sz22;
    ds.sh3 = -2.0 * out.ss2 * (out.sz23 - out.sz21);

    // Lunar periodic coefficients.
    ds.ee2 = 2.0 * out.s1 * s6;
    ds.e3 = 2.0 * out.s1 * s7;
    ds.xi2 = 2.0 * out.s2 * z12;
    ds.xi3 = 2.0 * out.s2 * (out.z13 - out.z11);
    ds.xl2 = -2.0 * out.s3 * z2;
    ds.xl3 = -2.0 * out.s3 * (out.z3 - out.z1);
    ds.xl4 = -2.0 * out.s3 * (-21.0 - 9.0 * out.emsq) * ZEL;
    ds.xgh2 = 2.0 * out.s4 * z32;
    ds.xgh3 = 2.0 * out.s4 * (out.z33 - out.z31);
    ds.xgh4 = -18.0 * out.s4 * ZEL;
    ds.xh2 = -2.0 * out.s2 * z22;
    ds.xh3 = -2.0 * out.s2 * (out.z23 - out.z21);

    out
}

/// Applies the lunar/solar periodic corrections to the osculating elements
/// at time `t`. With `init` set, establishes the epoch offsets instead.
#[allow(clippy::too_many_arguments)]
pub(crate) fn dpper(
    ds: &DeepSpace,
    t: f64,
    init: bool,
    afspc: bool,
    ep: &mut f64,
    inclp: &mut f64,
    nodep: &mut f64,
    argpp: &mut f64,
    mp: &mut f64,
) {
    const ZNS: f64 = 1.19459e-5;
    const ZES: f64 = 0.01675;
    const ZNL: f64 = 1.5835218e-4;
    const ZEL: f64 = 0.05490;

    // Solar terms.
    let mut zm = ds.zmos + ZNS * t;
    if init {
        zm = ds.zmos;
    }
    let mut zf = zm + 2.0 * ZES * sin(zm);
    let mut sinzf = sin(zf);
    let mut f2 = 0.5 * sinzf * sinzf - 0.25;
    let mut f3 = -0.5 * sinzf * cos(zf);
    let ses = ds.se2 * f2 + ds.se3 * f3;
    let sis = ds.si2 * f2 + ds.si3 * f3;
    let sls = ds.sl2 * f2 + ds.sl3 * f3 + ds.sl4 * sinzf;
    let sghs = ds.sgh2 * f2 + ds.sgh3 * f3 + ds.sgh4 * sinzf;
    let shs = ds.sh2 * f2 + ds.sh3 * f3;

    // Lunar terms.
    zm = ds.zmol + ZNL * t;
    if init {
        zm = ds.zmol;
    }
    zf = zm + 2.0 * ZEL * sin(zm);
    sinzf = sin(zf);
    f2 = 0.5 * sinzf * sinzf - 0.25;
    f3 = -0.5 * sinzf * cos(zf);
    let sel = ds.ee2 * f2 + ds.e3 * f3;
    let sil = ds.xi2 * f2 + ds.xi3 * f3;
    let sll = ds.xl2 * f2 + ds.xl3 * f3 + ds.xl4 * sinzf;
    let sghl = ds.xgh2 * f2 + ds.xgh3 * f3 + ds.xgh4 * sinzf;
    let shll = ds.xh2 * f2 + ds.xh3 * f3;

    let mut pe = ses + sel;
    let mut pinc = sis + sil;
    let mut pl = sls + sll;
    let mut pgh = sghs + sghl;
    let mut ph = shs + shll;

    if !init {
        pe -= ds.peo;
        pinc -= ds.pinco;
        pl -= ds.plo;
        pgh -= ds.pgho;
        ph -= ds.pho;
        *inclp += pinc;
        *ep += pe;
        let sinip = sin(*inclp);
        let cosip = cos(*inclp);

        if *inclp >= 0.2 {
            // Apply periodics directly (perturbed inclination form).
            let ph = ph / sinip;
            let pgh = pgh - cosip * ph;
            *argpp += pgh;
            *nodep += ph;
            *mp += pl;
        } else {
            // Lyddane modification near the singular inclination.
            let sinop = sin(*nodep);
            let cosop = cos(*nodep);
            let mut alfdp = sinip * sinop;
            let mut betdp = sinip * cosop;
            let dalf = ph * cosop + pinc * cosip * sinop;
            let dbet = -ph * sinop + pinc * cosip * cosop;
            alfdp += dalf;
            betdp += dbet;
            *nodep = fmod(*nodep, TWOPI);
            if *nodep < 0.0 && afspc {
                *nodep += TWOPI;
            }
            let mut xls = *mp + *argpp + cosip * *nodep;
            let dls = pl + pgh - pinc * *nodep * sinip;
            xls += dls;
            let xnoh = *nodep;
            *nodep = atan2(alfdp, betdp);
            if *nodep < 0.0 && afspc {
                *nodep += TWOPI;
            }
            if fabs(xnoh - *nodep) > PI {
                if *nodep < xnoh {
                    *nodep += TWOPI;
                } else {
                    *nodep -= TWOPI;
                }
            }
            *mp += pl;
            *argpp = xls - *mp - cosip * *nodep;
        }
    }
}

/// Derives the deep-space secular rates and resonance coefficients, and
/// applies the epoch secular contribution to the mean elements.
#[allow(clippy::too_many_arguments)]
pub(crate) fn dsinit(
    xke: f64,
    com: &DsCommon,
    argpo: f64,
    t: f64,
    tc: f64,
    gsto: f64,
    mo: f64,
    mdot: f64,
    no: f64,
    nodeo: f64,
    nodedot: f64,
    xpidot: f64,
    ecco: f64,
    eccsq: f64,
    inclm: &mut f64,
    em: &mut f64,
    argpm: &mut f64,
    mm: &mut f64,
    nm: &mut f64,
    nodem: &mut f64,
    dndt: &mut f64,
    ds: &mut DeepSpace,
) {
    const Q22: f64 = 1.7891679e-6;
    const Q31: f64 = 2.1460748e-6;
    const Q33: f64 = 2.2123015e-7;
    const ROOT22: f64 = 1.7891679e-6;
    const ROOT44: f64 = 7.3636953e-9;
    const ROOT54: f64 = 2.1765803e-9;
    const RPTIM: f64 = 4.375_269_088_011_299_66e-3;
    const ROOT32: f64 = 3.7393792e-7;
    const ROOT52: f64 = 1.1428639e-7;
    const X2O3: f64 = 2.0 / 3.0;
    const ZNL: f64 = 1.5835218e-4;
    const ZNS: f64 = 1.19459e-5;

    let sinim = com.sinim;
    let cosim = com.cosim;
    let mut emsq = com.emsq;

    ds.irez = 0;
    if *nm < 0.0052359877 && *nm > 0.0034906585 {
        ds.irez = 1;
    }
    if (8.26e-3..=9.24e-3).contains(nm) && *em >= 0.5 {
        ds.irez = 2;
    }

    // Solar secular rates.
    let ses = com.ss1 * ZNS * com.ss5;
    let sis = com.ss2 * ZNS * (com.sz11 + com.sz13);
    let sls = -ZNS * com.ss3 * (com.sz1 + com.sz3 - 14.0 - 6.0 * emsq);
    let sghs = com.ss4 * ZNS * (com.sz31 + com.sz33 - 6.0);
    let mut shs = -ZNS * com.ss2 * (com.sz21 + com.sz23);
    if *inclm < 5.2359877e-2 || *inclm > PI - 5.2359877e-2 {
        shs = 0.0;
    }
    if sinim != 0.0 {
        shs /= sinim;
    }
    let sgs = sghs - cosim * shs;

    // Lunar secular rates.
    ds.dedt = ses + com.s1 * ZNL * com.s5;
    ds.didt = sis + com.s2 * ZNL * (com.z11 + com.z13);
    ds.dmdt = sls - ZNL * com.s3 * (com.z1 + com.z3 - 14.0 - 6.0 * emsq);
    let sghl = com.s4 * ZNL * (com.z31 + com.z33 - 6.0);
    let mut shll = -ZNL * com.s2 * (com.z21 + com.z23);
    if *inclm < 5.2359877e-2 || *inclm > PI - 5.2359877e-2 {
        shll = 0.0;
    }
    ds.domdt = sgs + sghl;
    ds.dnodt = shs;
    if sinim != 0.0 {
        ds.domdt -= cosim / sinim * shll;
        ds.dnodt += shll / sinim;
    }

    // Deep-space resonance effects at epoch.
    *dndt = 0.0;
    let theta = fmod(gsto + tc * RPTIM, TWOPI);
    *em += ds.dedt * t;
    *inclm += ds.didt * t;
    *argpm += ds.domdt * t;
    *nodem += ds.dnodt * t;
    *mm += ds.dmdt * t;

    if ds.irez != 0 {
        let aonv = pow(*nm / xke, X2O3);

        if ds.irez == 2 {
            // Geopotential resonance, 12-hour orbits.
            let cosisq = cosim * cosim;
            let emo = *em;
            *em = ecco;
            emsq = eccsq;
            let eoc = *em * emsq;
            let g201 = -0.306 - (*em - 0.64) * 0.440;

            let (g211, g310, g322, g410, g422, g520);
            if *em <= 0.65 {
                g211 = 3.616 - 13.2470 * *em + 16.2900 * emsq;
                g310 = -19.302 + 117.3900 * *em - 228.4190 * emsq + 156.5910 * eoc;
                g322 = -18.9068 + 109.7927 * *em - 214.6334 * emsq + 146.5816 * eoc;
                g410 = -41.122 + 242.6940 * *em - 471.0940 * emsq + 313.9530 * eoc;
                g422 = -146.407 + 841.8800 * *em - 1629.014 * emsq + 1083.4350 * eoc;
                g520 = -532.114 + 3017.977 * *em - 5740.032 * emsq + 3708.2760 * eoc;
            } else {
                g211 = -72.099 + 331.819 * *em - 508.738 * emsq + 266.724 * eoc;
                g310 = -346.844 + 1582.851 * *em - 2415.925 * emsq + 1246.113 * eoc;
                g322 = -342.585 + 1554.908 * *em - 2366.899 * emsq + 1215.972 * eoc;
                g410 = -1052.797 + 4758.686 * *em - 7193.992 * emsq + 3651.957 * eoc;
                g422 = -3581.690 + 16178.110 * *em - 24462.770 * emsq + 12422.520 * eoc;
                g520 = if *em > 0.715 {
                    -5149.66 + 29936.92 * *em - 54087.36 * emsq + 31324.56 * eoc
                } else {
                    1464.74 - 4664.75 * *em + 3763.64 * emsq
                };
            }
            let (g533, g521, g532);
            if *em < 0.7 {
                g533 = -919.22770 + 4988.6100 * *em - 9064.7700 * emsq + 5542.21 * eoc;
                g521 = -822.71072 + 4568.6173 * *em - 8491.4146 * emsq + 5337.524 * eoc;
                g532 = -853.66600 + 4690.2500 * *em - 8624.7700 * emsq + 5341.4 * eoc;
            } else {
                g533 = -37995.780 + 161616.52 * *em - 229838.20 * emsq + 109377.94 * eoc;
                g521 = -51752.104 + 218913.95 * *em - 309468.16 * emsq + 146349.42 * eoc;
                g532 = -40023.880 + 170470.89 * *em - 242699.48 * emsq + 115605.82 * eoc;
            }

            let sini2 = sinim * sinim;
            let f220 = 0.75 * (1.0 + 2.0 * cosim + cosisq);
            let f221 = 1.5 * sini2;
            let f321 = 1.875 * sinim * (1.0 - 2.0 * cosim - 3.0 * cosisq);
            let f322 = -1.875 * sinim * (1.0 + 2.0 * cosim - 3.0 * cosisq);
            let f441 = 35.0 * sini2 * f220;
            let f442 = 39.3750 * sini2 * sini2;
            let f522 = 9.84375
                * sinim
                * (sini2 * (1.0 - 2.0 * cosim - 5.0 * cosisq)
                    + 0.33333333 * (-2.0 + 4.0 * cosim + 6.0 * cosisq));
            let f523 = sinim
                * (4.92187512 * sini2 * (-2.0 - 4.0 * cosim + 10.0 * cosisq)
                    + 6.56250012 * (1.0 + 2.0 * cosim - 3.0 * cosisq));
            let f542 = 29.53125
                * sinim
                * (2.0 - 8.0 * cosim + cosisq * (-12.0 + 8.0 * cosim + 10.0 * cosisq));
            let f543 = 29.53125
                * sinim
                * (-2.0 - 8.0 * cosim + cosisq * (12.0 + 8.0 * cosim - 10.0 * cosisq));
            let xno2 = *nm * *nm;
            let ainv2 = aonv * aonv;
            let mut temp1 = 3.0 * xno2 * ainv2;
            let mut temp = temp1 * ROOT22;
            ds.d2201 = temp * f220 * g201;
            ds.d2211 = temp * f221 * g211;
            temp1 *= aonv;
            temp = temp1 * ROOT32;
            ds.d3210 = temp * f321 * g310;
            ds.d3222 = temp * f322 * g322;
            temp1 *= aonv;
            temp = 2.0 * temp1 * ROOT44;
            ds.d4410 = temp * f441 * g410;
            ds.d4422 = temp * f442 * g422;
            temp1 *= aonv;
            temp = temp1 * ROOT52;
            ds.d5220 = temp * f522 * g520;
            ds.d5232 = temp * f523 * g532;
            temp = 2.0 * temp1 * ROOT54;
            ds.d5421 = temp * f542 * g521;
            ds.d5433 = temp * f543 * g533;
            ds.xlamo = fmod(mo + nodeo + nodeo - theta - theta, TWOPI);
            ds.xfact = mdot + ds.dmdt + 2.0 * (nodedot + ds.dnodt - RPTIM) - no;
            *em = emo;
        }

        if ds.irez == 1 {
            // Synchronous resonance.
            let g200 = 1.0 + emsq * (-2.5 + 0.8125 * emsq);
            let g310 = 1.0 + 2.0 * emsq;
            let g300 = 1.0 + emsq * (-6.0 + 6.60937 * emsq);
            let f220 = 0.75 * (1.0 + cosim) * (1.0 + cosim);
            let f311 = 0.9375 * sinim * sinim * (1.0 + 3.0 * cosim) - 0.75 * (1.0 + cosim);
            let mut f330 = 1.0 + cosim;
            f330 = 1.875 * f330 * f330 * f330;
            ds.del1 = 3.0 * *nm * *nm * aonv * aonv;
            ds.del2 = 2.0 * ds.del1 * f220 * g200 * Q22;
            ds.del3 = 3.0 * ds.del1 * f330 * g300 * Q33 * aonv;
            ds.del1 = ds.del1 * f311 * g310 * Q31 * aonv;
            ds.xlamo = fmod(mo + nodeo + argpo - theta, TWOPI);
            ds.xfact = mdot + xpidot - RPTIM + ds.dmdt + ds.domdt + ds.dnodt - no;
        }

        // Initialize the resonance integrator.
        ds.xli = ds.xlamo;
        ds.xni = no;
        ds.atime = 0.0;
        *nm = no + *dndt;
    }
}

/// Advances the deep-space secular terms and the resonance integrator to
/// time `t` (minutes from epoch).
#[allow(clippy::too_many_arguments)]
pub(crate) fn dspace(
    ds: &mut DeepSpace,
    argpo: f64,
    argpdot: f64,
    t: f64,
    tc: f64,
    gsto: f64,
    no: f64,
    em: &mut f64,
    argpm: &mut f64,
    inclm: &mut f64,
    mm: &mut f64,
    nodem: &mut f64,
    dndt: &mut f64,
    nm: &mut f64,
) {
    const FASX2: f64 = 0.13130908;
    const FASX4: f64 = 2.8843198;
    const FASX6: f64 = 0.37448087;
    const G22: f64 = 5.7686396;
    const G32: f64 = 0.95240898;
    const G44: f64 = 1.8014998;
    const G52: f64 = 1.0508330;
    const G54: f64 = 4.4108898;
    const RPTIM: f64 = 4.375_269_088_011_299_66e-3;
    const STEPP: f64 = 720.0;
    const STEPN: f64 = -720.0;
    const STEP2: f64 = 259_200.0;

    *dndt = 0.0;
    let theta = fmod(gsto + tc * RPTIM, TWOPI);
    *em += ds.dedt * t;
    *inclm += ds.didt * t;
    *argpm += ds.domdt * t;
    *nodem += ds.dnodt * t;
    *mm += ds.dmdt * t;

    if ds.irez == 0 {
        return;
    }

    // Euler-Maclaurin integration, with epoch restart when time runs
    // backwards past the last integration point.
    if ds.atime == 0.0 || t * ds.atime <= 0.0 || fabs(t) < fabs(ds.atime) {
        ds.atime = 0.0;
        ds.xni = no;
        ds.xli = ds.xlamo;
    }
    let delt = if t > 0.0 { STEPP } else { STEPN };

    let (new_nm, xl) = loop {
        let xndt;
        let xldot;
        let mut xnddt;
        if ds.irez != 2 {
            // Near-synchronous resonance.
            xndt = ds.del1 * sin(ds.xli - FASX2)
                + ds.del2 * sin(2.0 * (ds.xli - FASX4))
                + ds.del3 * sin(3.0 * (ds.xli - FASX6));
            xldot = ds.xni + ds.xfact;
            xnddt = ds.del1 * cos(ds.xli - FASX2)
                + 2.0 * ds.del2 * cos(2.0 * (ds.xli - FASX4))
                + 3.0 * ds.del3 * cos(3.0 * (ds.xli - FASX6));
            xnddt *= xldot;
        } else {
            // Near-half-day resonance.
            let xomi = argpo + argpdot * ds.atime;
            let x2omi = xomi + xomi;
            let x2li = ds.xli + ds.xli;
            xndt = ds.d2201 * sin(x2omi + ds.xli - G22)
                + ds.d2211 * sin(ds.xli - G22)
                + ds.d3210 * sin(xomi + ds.xli - G32)
                + ds.d3222 * sin(-xomi + ds.xli - G32)
                + ds.d4410 * sin(x2omi + x2li - G44)
                + ds.d4422 * sin(x2li - G44)
                + ds.d5220 * sin(xomi + ds.xli - G52)
                + ds.d5232 * sin(-xomi + ds.xli - G52)
                + ds.d5421 * sin(xomi + x2li - G54)
                + ds.d5433 * sin(-xomi + x2li - G54);
            xldot = ds.xni + ds.xfact;
            xnddt = ds.d2201 * cos(x2omi + ds.xli - G22)
                + ds.d2211 * cos(ds.xli - G22)
                + ds.d3210 * cos(xomi + ds.xli - G32)
                + ds.d3222 * cos(-xomi + ds.xli - G32)
                + ds.d5220 * cos(xomi + ds.xli - G52)
                + ds.d5232 * cos(-xomi + ds.xli - G52)
                + 2.0 * (ds.d4410 * cos(x2omi + x2li - G44)
                    + ds.d4422 * cos(x2li - G44)
                    + ds.d5421 * cos(xomi + x2li - G54)
                    + ds.d5433 * cos(-xomi + x2li - G54));
            xnddt *= xldot;
        }

        if fabs(t - ds.atime) < STEPP {
            let ft = t - ds.atime;
            break (
                ds.xni + xndt * ft + xnddt * ft * ft * 0.5,
                ds.xli + xldot * ft + xndt * ft * ft * 0.5,
            );
        }
        ds.xli += xldot * delt + xndt * STEP2;
        ds.xni += xndt * delt + xnddt * STEP2;
        ds.atime += delt;
    };

    *nm = new_nm;
    if ds.irez != 1 {
        *mm = xl - 2.0 * *nodem + 2.0 * theta;
        *dndt = *nm - no;
    } else {
        *mm = xl - *nodem - *argpm + theta;
        *dndt = *nm - no;
    }
    *nm = no + *dndt;
}
