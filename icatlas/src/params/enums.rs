//! 配准参数中的枚举字段。整数编码即声明顺序。

use super::value::code_enum;

code_enum! {
    /// 稠密配准中块匹配结果的聚合方式。
    AggregatorTypeNonRigid: "non-rigid aggregator type" {
        Baloo = "BALOO",
        MSmoother = "M_SMOOTHER",
    }
}

code_enum! {
    /// 刚性配准中块匹配结果的聚合方式。
    AggregatorTypeRigid: "rigid aggregator type" {
        MEstimation = "M_ESTIMATION",
        LeastSquares = "LEAST_SQUARES",
        LeastTrimmedSquares = "LEAST_TRIMMED_SQUARES",
    }
}

code_enum! {
    /// 对称配准方式。
    SymmetryType: "symmetry type" {
        Asymmetric = "ASYMMETRIC",
        Symmetric = "SYMMETRIC",
        Kissing = "KISSING",
    }
}

code_enum! {
    OptimizerType: "optimizer type" {
        Exhaustive = "EXHAUSTIVE",
        Bobyqa = "BOBYQA",
    }
}

code_enum! {
    /// 有向仿射变换的方向轴。
    CartesianAxis: "cartesian axis" {
        X = "X",
        Y = "Y",
        Z = "Z",
    }
}

code_enum! {
    /// 块之间的变换类型。
    TransformationType: "transformation type" {
        Translation = "TRANSLATION",
        Rigid = "RIGID",
        Affine = "AFFINE",
        DirectionalAffine = "DIRECTIONAL_AFFINE",
    }
}

code_enum! {
    SimilarityMetric: "similarity metric" {
        MeanSquares = "MEAN_SQUARES",
        CorrelationCoefficient = "CORRELATION_COEFFICIENT",
        SquaredCorrelationCoefficient = "SQUARED_CORRELATION_COEFFICIENT",
    }
}

code_enum! {
    /// 刚性配准的初始化方式。
    InitialisationType: "initialisation type" {
        Identity = "IDENTITY",
        AlignGravityCentres = "ALIGN_GRAVITY_CENTRES",
        GravityPcaClosestTransform = "GRAVITY_PCA_CLOSEST_TRANSFORM",
    }
}

code_enum! {
    /// 刚性配准输出的全局变换类型（`--ot`）。
    RigidOutputTransformationType: "output transformation type" {
        Translation = "TRANSLATION",
        Rigid = "RIGID",
        Affine = "AFFINE",
        AnisotropicSimilarity = "ANISOTROPIC_SIMILARITY",
    }
}
