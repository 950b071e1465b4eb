//! CUDA PTX kernel source.
//!
//! Loaded at runtime via cuModuleLoadData.

/// Null-terminated PTX module containing `matrix_mul`.
pub const PTX_MODULE: &str = concat!(
    r#"
.version 7.0
.target sm_50
.address_size 64

// -------------------------------------------------------------------------
// matrix_mul: C = A * B over signed 32-bit integers, one block per output
// element.
//
// Parameters (in order):
//   param_A     : .u64  pointer to A (rows x inner, row-major)
//   param_B     : .u64  pointer to B (inner x cols, row-major)
//   param_C     : .u64  pointer to C (rows x cols, row-major)
//   param_rows  : .u32
//   param_inner : .u32
//   param_cols  : .u32
//
// Grid:  (rows, cols, 1)   ctaid.x = row, ctaid.y = col
// Block: (1, 1, 1)
// Blocks outside the output return without writing.
// -------------------------------------------------------------------------
.visible .entry matrix_mul(
    .param .u64 param_A,
    .param .u64 param_B,
    .param .u64 param_C,
    .param .u32 param_rows,
    .param .u32 param_inner,
    .param .u32 param_cols
)
{
    .reg .u64 %rd<8>;
    .reg .u32 %r<12>;
    .reg .s32 %s<4>;
    .reg .pred %p<4>;

    ld.param.u64 %rd0, [param_A];
    ld.param.u64 %rd1, [param_B];
    ld.param.u64 %rd2, [param_C];
    ld.param.u32 %r0, [param_rows];
    ld.param.u32 %r1, [param_inner];
    ld.param.u32 %r2, [param_cols];

    mov.u32 %r3, %ctaid.x;       // row
    mov.u32 %r4, %ctaid.y;       // col

    setp.ge.u32 %p0, %r3, %r0;
    setp.ge.u32 %p1, %r4, %r2;
    or.pred %p2, %p0, %p1;
    @%p2 bra MATMUL_DONE;

    mov.s32 %s0, 0;              // value
    mov.u32 %r5, 0;              // k
    mul.lo.u32 %r6, %r3, %r1;    // row * inner

MATMUL_K_LOOP:
    setp.ge.u32 %p3, %r5, %r1;
    @%p3 bra MATMUL_STORE;

    add.u32 %r7, %r6, %r5;       // row * inner + k
    mul.wide.u32 %rd3, %r7, 4;
    add.u64 %rd3, %rd0, %rd3;
    ld.global.s32 %s1, [%rd3];

    mul.lo.u32 %r8, %r5, %r2;    // k * cols + col
    add.u32 %r8, %r8, %r4;
    mul.wide.u32 %rd4, %r8, 4;
    add.u64 %rd4, %rd1, %rd4;
    ld.global.s32 %s2, [%rd4];

    mad.lo.s32 %s0, %s1, %s2, %s0;
    add.u32 %r5, %r5, 1;
    bra MATMUL_K_LOOP;

MATMUL_STORE:
    mul.lo.u32 %r9, %r3, %r2;    // row * cols + col
    add.u32 %r9, %r9, %r4;
    mul.wide.u32 %rd5, %r9, 4;
    add.u64 %rd5, %rd2, %rd5;
    st.global.s32 [%rd5], %s0;

MATMUL_DONE:
    ret;
}
"#,
    "\0"
);
